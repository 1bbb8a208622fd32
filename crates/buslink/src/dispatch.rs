// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Inbound frame dispatch.
//!
//! The transport backend invokes the dispatcher from its receive context
//! (often a backend-owned thread), so everything here must be cheap and
//! non-blocking: decode the frame, classify it, and hand it off.
//!
//! - ACK/NACK frames resolve the matching tracker entry and queue its ID for
//!   cleanup by the agent loop.
//! - DATA frames are checked against the duplicate ring; fresh ones go to the
//!   bounded receive queue, duplicates are re-acknowledged and dropped.
//!
//! Acknowledgments are never sent inline from this path. They go through the
//! [`AckScheduler`] so a slow or blocking transport cannot stall the receive
//! context.

use crossbeam::channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::acker::AckScheduler;
use crate::dedup::DuplicateDetector;
use crate::error::{AgentError, Result};
use crate::metrics::AgentMetrics;
use crate::tracker::{AckOutcome, TrackerPool};
use crate::wire::{MessageKind, WireCodec, WireMessage};

/// Decodes inbound frames and routes them by kind.
pub struct ReceiveDispatcher {
    name: String,
    codec: Arc<dyn WireCodec>,
    dedup: Mutex<DuplicateDetector>,
    tracker: Arc<TrackerPool>,
    acker: Arc<AckScheduler>,
    recv_tx: Sender<WireMessage>,
    cleanup_tx: Sender<u32>,
    metrics: Arc<AgentMetrics>,
}

impl ReceiveDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        codec: Arc<dyn WireCodec>,
        dedup: DuplicateDetector,
        tracker: Arc<TrackerPool>,
        acker: Arc<AckScheduler>,
        recv_tx: Sender<WireMessage>,
        cleanup_tx: Sender<u32>,
        metrics: Arc<AgentMetrics>,
    ) -> Self {
        Self {
            name: name.into(),
            codec,
            dedup: Mutex::new(dedup),
            tracker,
            acker,
            recv_tx,
            cleanup_tx,
            metrics,
        }
    }

    /// Entry point for raw frames from the transport.
    ///
    /// Errors are reported to the caller for logging but the dispatcher
    /// itself stays usable; a malformed or dropped frame only affects the
    /// message it carried.
    pub fn on_receive(&self, raw: &[u8]) -> Result<()> {
        let msg = self.codec.decode(raw)?;
        match msg.kind {
            MessageKind::Ack => self.on_response(msg.id, false),
            MessageKind::Nack => self.on_response(msg.id, true),
            MessageKind::Data => self.on_data(msg),
        }
    }

    /// Resolve an ACK or NACK against the tracker.
    ///
    /// The once-flag inside the tracker decides the race against a
    /// concurrently firing retry timer: only the winner queues the cleanup.
    fn on_response(&self, id: u32, negative: bool) -> Result<()> {
        if negative {
            log::warn!("[RX] {}: NACK for message {}", self.name, id);
            AgentMetrics::bump(&self.metrics.nacks_received);
        } else {
            AgentMetrics::bump(&self.metrics.acks_received);
        }
        match self.tracker.mark_acknowledged(id) {
            AckOutcome::Marked => self.queue_cleanup(id),
            AckOutcome::AlreadyMarked => {
                log::debug!("[RX] {}: repeated response for message {}", self.name, id);
            }
            AckOutcome::NotTracked => {
                // Late response for an entry the timer already exhausted, or
                // an ACK for an untracked send. Harmless either way.
                log::debug!("[RX] {}: response for unknown message {}", self.name, id);
            }
        }
        Ok(())
    }

    /// Deliver a DATA message to the receive queue, suppressing duplicates.
    ///
    /// A fresh message is only recorded and enqueued: its ACK is sent by the
    /// processor once the local publish succeeds, so an unacknowledged
    /// publish failure stays retryable on the sender's side. Only a
    /// duplicate, which the processor already handled, is re-acknowledged
    /// here. The dedup lock is held across the enqueue so an ID is recorded
    /// exactly when its message made it into the queue; a message dropped on
    /// queue overflow is neither recorded nor acknowledged and the sender's
    /// retransmission retries the delivery.
    fn on_data(&self, msg: WireMessage) -> Result<()> {
        let id = msg.id;
        let mut dedup = self.dedup.lock();
        if dedup.is_duplicate(id) {
            drop(dedup);
            log::debug!("[RX] {}: duplicate message {}, re-acking", self.name, id);
            AgentMetrics::bump(&self.metrics.duplicates_suppressed);
            return self.acker.schedule(id, MessageKind::Ack);
        }
        match self.recv_tx.try_send(msg) {
            Ok(()) => {
                dedup.record(id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                drop(dedup);
                log::error!(
                    "[RX] {}: receive queue full, dropping message {}",
                    self.name,
                    id
                );
                AgentMetrics::bump(&self.metrics.queue_drops);
                Err(AgentError::QueueFull { queue: "receive" })
            }
            Err(TrySendError::Disconnected(_)) => Err(AgentError::Transport {
                reason: "receive queue closed".into(),
            }),
        }
    }

    fn queue_cleanup(&self, id: u32) {
        if let Err(err) = self.cleanup_tx.try_send(id) {
            // Best-effort drop; the slot stays occupied. Keep the cleanup
            // queue at least as deep as the tracking pool.
            log::warn!(
                "[RX] {}: cleanup queue full for message {} ({})",
                self.name,
                id,
                err
            );
            AgentMetrics::bump(&self.metrics.queue_drops);
        }
    }
}

// =====================================================================
// Tests
// =====================================================================
