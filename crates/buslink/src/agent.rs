// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Proxy agent orchestration.
//!
//! [`ProxyAgent`] wires the tracker, retry timer, acknowledgment scheduler
//! and receive dispatcher to a transport backend and a channel registry, and
//! runs the single polling loop that owns all tracker-list mutation.
//!
//! The loop blocks on three sources:
//!
//! - the bus subscriber queue (local publishes to forward to the remote),
//! - the receive queue (DATA messages the dispatcher accepted off the wire),
//! - the cleanup queue (IDs whose tracked lifetime has concluded).
//!
//! Retry timers are not a polled source; they fire on the timer thread and
//! communicate back through the cleanup queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, select, Receiver, Sender};

use crate::acker::AckScheduler;
use crate::bus::{BusEvent, ChannelRegistry};
use crate::config::AgentConfig;
use crate::dedup::DuplicateDetector;
use crate::dispatch::ReceiveDispatcher;
use crate::error::{AgentError, Result};
use crate::metrics::AgentMetrics;
use crate::retry::RetryTimer;
use crate::tracker::{retry_backoff_ms, RetryDecision, TrackerPool};
use crate::transport::Backend;
use crate::wire::{FlatCodec, MessageKind, WireCodec, WireMessage};

/// Reliable-delivery proxy between a local bus and a remote peer.
pub struct ProxyAgent {
    config: AgentConfig,
    backend: Arc<dyn Backend>,
    registry: Arc<dyn ChannelRegistry>,
    codec: Arc<dyn WireCodec>,
    metrics: Arc<AgentMetrics>,
    tracker: Arc<TrackerPool>,
    acker: Arc<AckScheduler>,
    retry: RetryTimer,
    dispatcher: Arc<ReceiveDispatcher>,
    recv_rx: Receiver<WireMessage>,
    cleanup_rx: Receiver<u32>,
    next_id: AtomicU32,
}

impl ProxyAgent {
    /// Build an agent and spawn its worker threads.
    ///
    /// The agent is quiescent until [`run`](Self::run) registers the receive
    /// callback and initializes the backend; sends are accepted immediately.
    pub fn new(
        config: AgentConfig,
        backend: Arc<dyn Backend>,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let codec: Arc<dyn WireCodec> = Arc::new(FlatCodec::new(config.max_frame_size));
        let metrics = Arc::new(AgentMetrics::new());
        let tracker = Arc::new(TrackerPool::new(config.track_capacity));
        let (recv_tx, recv_rx) = bounded(config.recv_queue_depth);
        let (cleanup_tx, cleanup_rx) = bounded(config.cleanup_queue_depth);

        let acker = Arc::new(AckScheduler::spawn(
            &config.name,
            Arc::clone(&backend),
            Arc::clone(&codec),
            Arc::clone(&metrics),
            config.max_frame_size,
            config.ack_queue_depth,
        )?);

        let retry = RetryTimer::spawn(
            &config.name,
            Self::timeout_handler(
                &config,
                Arc::clone(&tracker),
                Arc::clone(&backend),
                Arc::clone(&codec),
                Arc::clone(&metrics),
                cleanup_tx.clone(),
            ),
        )?;

        let dispatcher = Arc::new(ReceiveDispatcher::new(
            config.name.clone(),
            Arc::clone(&codec),
            DuplicateDetector::new(config.dedup_capacity),
            Arc::clone(&tracker),
            Arc::clone(&acker),
            recv_tx,
            cleanup_tx,
            Arc::clone(&metrics),
        ));

        Ok(Self {
            config,
            backend,
            registry,
            codec,
            metrics,
            tracker,
            acker,
            retry,
            dispatcher,
            recv_rx,
            cleanup_rx,
            next_id: AtomicU32::new(1),
        })
    }

    /// Build the closure the retry timer runs when a timeout fires.
    ///
    /// Runs on the timer thread. The returned delay (if any) re-arms the
    /// timer for the same handle; `None` ends the retry chain, with the
    /// cleanup queue carrying terminal IDs back to the agent loop. A failed
    /// retransmission ends the chain rather than rescheduling: a transport
    /// that cannot send now gains nothing from resending the same frame on a
    /// longer delay, and the entry is reaped instead.
    fn timeout_handler(
        config: &AgentConfig,
        tracker: Arc<TrackerPool>,
        backend: Arc<dyn Backend>,
        codec: Arc<dyn WireCodec>,
        metrics: Arc<AgentMetrics>,
        cleanup_tx: Sender<u32>,
    ) -> impl Fn(crate::tracker::TrackHandle) -> Option<Duration> + Send + 'static {
        let name = config.name.clone();
        let retry_limit = config.retry_limit;
        let initial_ms = config.initial_timeout_ms;
        let max_ms = config.max_timeout_ms;
        let max_frame = config.max_frame_size;

        move |handle| match tracker.begin_retry(handle, retry_limit) {
            RetryDecision::Stale | RetryDecision::Acked => None,
            RetryDecision::Exhausted { id } => {
                log::warn!(
                    "[TRACK] {}: message {} exhausted its attempt limit",
                    name,
                    id
                );
                AgentMetrics::bump(&metrics.exhausted);
                queue_cleanup(&cleanup_tx, &metrics, id);
                None
            }
            RetryDecision::Resend { msg, attempt } => {
                let mut buf = Vec::with_capacity(max_frame);
                let sent = codec
                    .encode(&msg, &mut buf)
                    .map_err(AgentError::from)
                    .and_then(|_| backend.send(&buf).map_err(AgentError::from));
                match sent {
                    Ok(()) => {
                        log::debug!(
                            "[TRACK] {}: retransmitted message {} (attempt {})",
                            name,
                            msg.id,
                            attempt
                        );
                        AgentMetrics::bump(&metrics.retransmits);
                        let delay = retry_backoff_ms(initial_ms, attempt, max_ms);
                        Some(Duration::from_millis(u64::from(delay)))
                    }
                    Err(err) => {
                        log::error!(
                            "[TRACK] {}: retransmission of message {} failed: {}",
                            name,
                            msg.id,
                            err
                        );
                        queue_cleanup(&cleanup_tx, &metrics, msg.id);
                        None
                    }
                }
            }
        }
    }

    /// Send a payload to the remote side of `channel`.
    ///
    /// Returns the allocated message ID. With a tracking pool configured the
    /// message is retransmitted until acknowledged or exhausted; a full pool
    /// is a hard failure and nothing is transmitted.
    pub fn send_data(&self, channel: &str, payload: impl Into<Vec<u8>>) -> Result<u32> {
        let id = self.alloc_id();
        self.send_message(WireMessage::data(id, channel, payload), 0)?;
        Ok(id)
    }

    /// Transmit a DATA message, entering it into tracking first.
    ///
    /// `attempts` seeds the tracked attempt counter (0 for a fresh send).
    /// Tracking and the first timer are armed before the transmission so a
    /// send failure leaves the entry in place for the timer to retry.
    pub fn send_message(&self, msg: WireMessage, attempts: u32) -> Result<()> {
        if msg.kind != MessageKind::Data {
            return Err(AgentError::InvalidArgument {
                reason: "only DATA messages enter the send path".into(),
            });
        }

        let mut buf = Vec::with_capacity(self.config.max_frame_size);
        self.codec.encode(&msg, &mut buf)?;
        let id = msg.id;

        if self.tracker.capacity() > 0 {
            let handle = self.tracker.start_tracking(msg, attempts)?;
            let delay = retry_backoff_ms(
                self.config.initial_timeout_ms,
                attempts,
                self.config.max_timeout_ms,
            );
            self.retry
                .schedule(handle, Duration::from_millis(u64::from(delay)));
        }

        self.backend.send(&buf)?;
        AgentMetrics::bump(&self.metrics.data_sent);
        log::debug!("[AGENT] {}: sent message {}", self.config.name, id);
        Ok(())
    }

    /// Deliver one received DATA message onto its local shadow channel.
    ///
    /// Unknown channel and validator mismatch are protocol errors answered
    /// with a NACK: they tell the remote the message will never succeed. A
    /// failed publish gets no response at all; the sender's retry covers the
    /// possibly-transient local condition.
    pub fn process_received(&self, msg: WireMessage) -> Result<()> {
        let Some(channel) = self.registry.channel_from_name(&msg.channel) else {
            log::warn!(
                "[AGENT] {}: message {} names unknown channel {:?}",
                self.config.name,
                msg.id,
                msg.channel
            );
            self.acker.schedule(msg.id, MessageKind::Nack)?;
            return Err(AgentError::ChannelNotFound { name: msg.channel });
        };

        if channel.validator() != self.config.shadow_validator {
            log::warn!(
                "[AGENT] {}: channel {:?} is not a shadow channel of this agent",
                self.config.name,
                msg.channel
            );
            self.acker.schedule(msg.id, MessageKind::Nack)?;
            return Err(AgentError::PermissionDenied {
                channel: msg.channel,
            });
        }

        if let Err(err) = channel.publish(&msg.payload) {
            log::warn!(
                "[AGENT] {}: publish of message {} to {:?} failed: {}",
                self.config.name,
                msg.id,
                msg.channel,
                err
            );
            return Err(AgentError::PublishFailed {
                reason: err.to_string(),
            });
        }

        AgentMetrics::bump(&self.metrics.published);
        self.acker.schedule(msg.id, MessageKind::Ack)
    }

    /// Run the agent loop until the subscriber queue disconnects.
    ///
    /// Registers the receive callback, initializes the backend, then blocks
    /// on the three sources. Per-message failures are logged and the loop
    /// continues; only subscriber disconnection ends it.
    pub fn run(&self, subscriber: &Receiver<BusEvent>) -> Result<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let tag = self.config.name.clone();
        self.backend.set_recv_cb(Arc::new(move |raw| {
            if let Err(err) = dispatcher.on_receive(raw) {
                log::debug!("[RX] {}: inbound frame rejected: {}", tag, err);
            }
        }))?;
        self.backend.init()?;

        log::debug!("[AGENT] {}: loop started", self.config.name);
        let recv_rx = &self.recv_rx;
        let cleanup_rx = &self.cleanup_rx;

        loop {
            select! {
                recv(subscriber) -> event => match event {
                    Ok(event) => {
                        if let Err(err) = self.forward_local(event) {
                            log::warn!(
                                "[AGENT] {}: local publish not forwarded: {}",
                                self.config.name,
                                err
                            );
                        }
                    }
                    Err(_) => break,
                },
                recv(recv_rx) -> msg => {
                    if let Ok(msg) = msg {
                        if let Err(err) = self.process_received(msg) {
                            log::warn!(
                                "[AGENT] {}: received message not delivered: {}",
                                self.config.name,
                                err
                            );
                        }
                    }
                }
                recv(cleanup_rx) -> id => {
                    if let Ok(id) = id {
                        self.reap(id);
                        for id in cleanup_rx.try_iter() {
                            self.reap(id);
                        }
                    }
                }
            }
        }

        log::debug!("[AGENT] {}: loop stopped", self.config.name);
        Ok(())
    }

    /// Counter snapshot for observability and tests.
    #[must_use]
    pub fn metrics(&self) -> &AgentMetrics {
        &self.metrics
    }

    /// Number of messages currently tracked.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Forward one local bus publish to the remote as a fresh DATA message.
    fn forward_local(&self, event: BusEvent) -> Result<()> {
        let id = self.alloc_id();
        let msg = WireMessage::data(id, event.channel.name(), event.payload);
        self.send_message(msg, 0)
    }

    /// Remove one concluded entry, tolerating the ACK/timeout race.
    fn reap(&self, id: u32) {
        match self.tracker.stop_tracking(id) {
            Ok(()) | Err(AgentError::NotFound { .. }) => {}
            Err(err) => {
                log::error!(
                    "[AGENT] {}: cleanup of message {} failed: {}",
                    self.config.name,
                    id,
                    err
                );
            }
        }
    }

    /// Next message ID. Wraps, skipping 0.
    fn alloc_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

fn queue_cleanup(cleanup_tx: &Sender<u32>, metrics: &AgentMetrics, id: u32) {
    if cleanup_tx.try_send(id).is_err() {
        log::warn!("[TRACK] cleanup queue full, dropping entry {}", id);
        AgentMetrics::bump(&metrics.queue_drops);
    }
}

// =====================================================================
// Tests
// =====================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalChannel, LocalRegistry, ValidatorTag};
    use crate::config::RETRY_UNLIMITED;
    use parking_lot::Mutex;
    use std::io;
    use std::time::Instant;

    /// Backend that records every frame handed to `send`.
    struct RecordingBackend {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> usize {
            self.frames.lock().len()
        }
    }

    impl Backend for RecordingBackend {
        fn init(&self) -> io::Result<()> {
            Ok(())
        }
        fn send(&self, frame: &[u8]) -> io::Result<()> {
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }
        fn set_recv_cb(&self, _cb: crate::transport::RecvCallback) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_config(name: &str) -> AgentConfig {
        AgentConfig {
            name: name.into(),
            shadow_validator: ValidatorTag(7),
            ..AgentConfig::default()
        }
    }

    fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_send_data_transmits_and_tracks() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let agent = ProxyAgent::new(test_config("t"), backend.clone(), registry).unwrap();

        let id = agent.send_data("telemetry", b"x".to_vec()).unwrap();
        assert!(id != 0);
        assert_eq!(backend.sent(), 1);
        assert_eq!(agent.in_flight(), 1);
        assert_eq!(agent.metrics().snapshot().data_sent, 1);
    }

    #[test]
    fn test_send_rejects_response_kinds() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let agent = ProxyAgent::new(test_config("t"), backend, registry).unwrap();

        assert!(matches!(
            agent.send_message(WireMessage::ack(1), 0),
            Err(AgentError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_pool_exhaustion_is_a_hard_send_failure() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let config = AgentConfig {
            track_capacity: 1,
            // Long timeout so the timer never interferes.
            initial_timeout_ms: 60_000,
            ..test_config("t")
        };
        let agent = ProxyAgent::new(config, backend.clone(), registry).unwrap();

        agent.send_data("telemetry", b"a".to_vec()).unwrap();
        assert!(matches!(
            agent.send_data("telemetry", b"b".to_vec()),
            Err(AgentError::PoolExhausted)
        ));
        // The second message was never transmitted.
        assert_eq!(backend.sent(), 1);
    }

    #[test]
    fn test_untracked_send_when_pool_disabled() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let config = AgentConfig {
            track_capacity: 0,
            ..test_config("t")
        };
        let agent = ProxyAgent::new(config, backend.clone(), registry).unwrap();

        agent.send_data("telemetry", b"a".to_vec()).unwrap();
        assert_eq!(backend.sent(), 1);
        assert_eq!(agent.in_flight(), 0);
    }

    #[test]
    fn test_retry_limit_bounds_transmission_count() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let config = AgentConfig {
            initial_timeout_ms: 10,
            retry_limit: 3,
            ..test_config("t")
        };
        let agent = ProxyAgent::new(config, backend.clone(), registry).unwrap();

        agent.send_data("telemetry", b"a".to_vec()).unwrap();
        // 10 + 20ms of timer delays, then nothing more fires.
        assert!(wait_until(2_000, || {
            agent.metrics().snapshot().exhausted == 1
        }));
        assert_eq!(backend.sent(), 3);
        assert_eq!(agent.metrics().snapshot().retransmits, 2);
    }

    #[test]
    fn test_unlimited_retry_keeps_retransmitting() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let config = AgentConfig {
            initial_timeout_ms: 5,
            max_timeout_ms: 5,
            retry_limit: RETRY_UNLIMITED,
            ..test_config("t")
        };
        let agent = ProxyAgent::new(config, backend.clone(), registry).unwrap();

        agent.send_data("telemetry", b"a".to_vec()).unwrap();
        assert!(wait_until(2_000, || backend.sent() >= 5));
        assert_eq!(agent.metrics().snapshot().exhausted, 0);
        assert_eq!(agent.in_flight(), 1);
    }

    #[test]
    fn test_process_received_publishes_to_shadow_channel() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let channel = LocalChannel::new("telemetry", ValidatorTag(7), 64, 4);
        registry.add(channel.clone());
        let agent = ProxyAgent::new(test_config("t"), backend.clone(), registry).unwrap();

        agent
            .process_received(WireMessage::data(9, "telemetry", b"v".to_vec()))
            .unwrap();
        assert_eq!(channel.delivered().try_recv().unwrap(), b"v");
        assert_eq!(agent.metrics().snapshot().published, 1);
        // The scheduled ACK eventually reaches the backend.
        assert!(wait_until(1_000, || backend.sent() == 1));
    }

    #[test]
    fn test_unknown_channel_is_nacked() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let agent = ProxyAgent::new(test_config("t"), backend.clone(), registry).unwrap();

        assert!(matches!(
            agent.process_received(WireMessage::data(9, "nope", b"v".to_vec())),
            Err(AgentError::ChannelNotFound { .. })
        ));
        assert!(wait_until(1_000, || backend.sent() == 1));
        let frames = backend.frames.lock();
        assert_eq!(frames[0][0], MessageKind::Nack as u8);
    }

    #[test]
    fn test_validator_mismatch_is_nacked_without_publish() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let channel = LocalChannel::new("telemetry", ValidatorTag(99), 64, 4);
        registry.add(channel.clone());
        let agent = ProxyAgent::new(test_config("t"), backend.clone(), registry).unwrap();

        assert!(matches!(
            agent.process_received(WireMessage::data(9, "telemetry", b"v".to_vec())),
            Err(AgentError::PermissionDenied { .. })
        ));
        assert!(channel.delivered().try_recv().is_err());
        assert_eq!(agent.metrics().snapshot().published, 0);
        assert!(wait_until(1_000, || backend.sent() == 1));
        let frames = backend.frames.lock();
        assert_eq!(frames[0][0], MessageKind::Nack as u8);
    }

    #[test]
    fn test_failed_publish_gets_no_response() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        // Depth-zero channels cannot exist with crossbeam's bounded(0)
        // semantics (rendezvous), so force failure via the size limit.
        let channel = LocalChannel::new("telemetry", ValidatorTag(7), 1, 4);
        registry.add(channel);
        let agent = ProxyAgent::new(test_config("t"), backend.clone(), registry).unwrap();

        assert!(matches!(
            agent.process_received(WireMessage::data(9, "telemetry", b"too big".to_vec())),
            Err(AgentError::PublishFailed { .. })
        ));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(backend.sent(), 0);
    }

    #[test]
    fn test_message_ids_are_sequential_and_nonzero() {
        let backend = RecordingBackend::new();
        let registry = Arc::new(LocalRegistry::new());
        let config = AgentConfig {
            track_capacity: 0,
            ..test_config("t")
        };
        let agent = ProxyAgent::new(config, backend, registry).unwrap();

        let a = agent.send_data("telemetry", b"a".to_vec()).unwrap();
        let b = agent.send_data("telemetry", b"b".to_vec()).unwrap();
        assert_eq!(b, a.wrapping_add(1));
        assert!(a != 0 && b != 0);
    }
}
