// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Deferred acknowledgment transmission.
//!
//! The receive path must never block on the transport, so ACK/NACK sends are
//! deferred to a dedicated worker: `schedule` pushes the pending (id, kind)
//! pair onto a bounded queue, the worker encodes and sends it. ACKs are
//! fire-and-forget: there is no retry of an acknowledgment; reliability for
//! data comes from the sender's retransmission plus receiver deduplication,
//! so a dropped or lost ACK only costs one extra round trip.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::{AgentError, Result};
use crate::metrics::AgentMetrics;
use crate::transport::Backend;
use crate::wire::{MessageKind, WireCodec, WireMessage};

struct Pending {
    id: u32,
    kind: MessageKind,
}

/// Asynchronous ACK/NACK sender.
pub struct AckScheduler {
    tx: Option<Sender<Pending>>,
    worker: Option<JoinHandle<()>>,
    metrics: Arc<AgentMetrics>,
}

impl AckScheduler {
    /// Spawn the acknowledgment worker.
    pub fn spawn(
        name: &str,
        backend: Arc<dyn Backend>,
        codec: Arc<dyn WireCodec>,
        metrics: Arc<AgentMetrics>,
        max_frame: usize,
        depth: usize,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded(depth);
        let tag = name.to_owned();
        let worker_metrics = Arc::clone(&metrics);
        let worker = std::thread::Builder::new()
            .name(format!("{}-ack", name))
            .spawn(move || {
                Self::run_loop(&tag, &rx, &*backend, &*codec, &worker_metrics, max_frame);
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            metrics,
        })
    }

    /// Queue an ACK or NACK for asynchronous transmission.
    ///
    /// Only the two response kinds are accepted. A full queue drops the
    /// response with a warning: the remote sender will time out, retransmit,
    /// and be re-acknowledged after deduplication.
    pub fn schedule(&self, id: u32, kind: MessageKind) -> Result<()> {
        if !kind.is_response() {
            return Err(AgentError::InvalidArgument {
                reason: format!("{:?} is not an acknowledgment kind", kind),
            });
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(AgentError::Transport {
                reason: "acknowledgment worker stopped".into(),
            });
        };
        match tx.try_send(Pending { id, kind }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(pending)) => {
                log::warn!(
                    "[ACK] response queue full, dropping {:?} for id {}",
                    pending.kind,
                    pending.id
                );
                AgentMetrics::bump(&self.metrics.queue_drops);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(AgentError::Transport {
                reason: "acknowledgment worker stopped".into(),
            }),
        }
    }

    fn run_loop(
        tag: &str,
        rx: &Receiver<Pending>,
        backend: &dyn Backend,
        codec: &dyn WireCodec,
        metrics: &AgentMetrics,
        max_frame: usize,
    ) {
        let mut buf = Vec::with_capacity(max_frame);

        while let Ok(pending) = rx.recv() {
            let msg = match pending.kind {
                MessageKind::Ack => WireMessage::ack(pending.id),
                MessageKind::Nack => WireMessage::nack(pending.id),
                MessageKind::Data => continue, // rejected in schedule()
            };

            if let Err(err) = codec.encode(&msg, &mut buf) {
                log::warn!(
                    "[ACK] {}: failed to encode {:?} for id {}: {}",
                    tag,
                    pending.kind,
                    pending.id,
                    err
                );
                continue;
            }
            if let Err(err) = backend.send(&buf) {
                log::warn!(
                    "[ACK] {}: failed to send {:?} for id {}: {}",
                    tag,
                    pending.kind,
                    pending.id,
                    err
                );
                AgentMetrics::bump(&metrics.queue_drops);
            }
        }
    }
}

impl Drop for AckScheduler {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::FlatCodec;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct SinkBackend {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl Backend for SinkBackend {
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

    fn wait_for_frames(backend: &SinkBackend, count: usize) {
        for _ in 0..100 {
            if backend.frames.lock().len() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("worker never sent {} frames", count);
    }

    #[test]
    fn test_scheduled_responses_are_sent() {
        let backend = Arc::new(SinkBackend {
            frames: Mutex::new(Vec::new()),
        });
        let codec = Arc::new(FlatCodec::new(64));
        let metrics = Arc::new(AgentMetrics::new());

        let acker = AckScheduler::spawn(
            "test",
            Arc::clone(&backend) as Arc<dyn Backend>,
            Arc::clone(&codec) as Arc<dyn WireCodec>,
            Arc::clone(&metrics),
            64,
            8,
        )
        .expect("spawn");

        acker
            .schedule(42, MessageKind::Ack)
            .expect("schedule ack");
        acker
            .schedule(43, MessageKind::Nack)
            .expect("schedule nack");

        wait_for_frames(&backend, 2);
        let frames = backend.frames.lock();
        let first = codec.decode(&frames[0]).expect("decode");
        let second = codec.decode(&frames[1]).expect("decode");
        assert_eq!(first, WireMessage::ack(42));
        assert_eq!(second, WireMessage::nack(43));
    }

    #[test]
    fn test_data_kind_rejected() {
        let backend = Arc::new(SinkBackend {
            frames: Mutex::new(Vec::new()),
        });
        let metrics = Arc::new(AgentMetrics::new());
        let acker = AckScheduler::spawn(
            "test",
            backend as Arc<dyn Backend>,
            Arc::new(FlatCodec::new(64)) as Arc<dyn WireCodec>,
            Arc::clone(&metrics),
            64,
            8,
        )
        .expect("spawn");

        assert!(matches!(
            acker.schedule(1, MessageKind::Data),
            Err(AgentError::InvalidArgument { .. })
        ));
    }
}
