// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Backend transport contract.
//!
//! The byte-level link (IPC, UART, UDP, ...) is an external collaborator
//! behind the [`Backend`] trait: the agent initializes it, hands it encoded
//! frames, and registers one receive callback. The callback may be invoked on
//! any transport-owned thread; the agent's receive path never blocks inside
//! it.
//!
//! [`MemoryLink`] is an in-process loopback pair used by the integration
//! tests and by embedders bridging two co-located agents.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

/// Frame receive hook registered by the agent.
pub type RecvCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Opaque unreliable transport.
pub trait Backend: Send + Sync {
    /// Bring the link up. Called once by the agent loop before polling.
    fn init(&self) -> io::Result<()>;
    /// Transmit one encoded frame. Delivery is not guaranteed.
    fn send(&self, frame: &[u8]) -> io::Result<()>;
    /// Register the frame receive hook.
    fn set_recv_cb(&self, cb: RecvCallback) -> io::Result<()>;
}

type CallbackSlot = Arc<Mutex<Option<RecvCallback>>>;

/// One endpoint of an in-process frame link.
///
/// Frames sent on one endpoint are delivered synchronously to the callback
/// registered on the peer. Sending before the peer registered its callback
/// fails with `NotConnected`.
pub struct MemoryLink {
    local_cb: CallbackSlot,
    peer_cb: CallbackSlot,
}

impl MemoryLink {
    /// Create two connected endpoints.
    #[must_use]
    pub fn pair() -> (Arc<MemoryLink>, Arc<MemoryLink>) {
        let a_cb: CallbackSlot = Arc::new(Mutex::new(None));
        let b_cb: CallbackSlot = Arc::new(Mutex::new(None));

        let a = Arc::new(MemoryLink {
            local_cb: Arc::clone(&a_cb),
            peer_cb: Arc::clone(&b_cb),
        });
        let b = Arc::new(MemoryLink {
            local_cb: b_cb,
            peer_cb: a_cb,
        });
        (a, b)
    }
}

impl Backend for MemoryLink {
    fn init(&self) -> io::Result<()> {
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> io::Result<()> {
        // Clone the callback out of the slot so the peer can re-register
        // while a delivery is in flight.
        let cb = self.peer_cb.lock().clone();
        match cb {
            Some(cb) => {
                cb(frame);
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "peer has no receive callback",
            )),
        }
    }

    fn set_recv_cb(&self, cb: RecvCallback) -> io::Result<()> {
        *self.local_cb.lock() = Some(cb);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pair_delivers_to_peer() {
        let (a, b) = MemoryLink::pair();
        let got: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&got);
        b.set_recv_cb(Arc::new(move |frame| sink.lock().push(frame.to_vec())))
            .expect("set_recv_cb");

        a.send(&[1, 2, 3]).expect("send");
        assert_eq!(got.lock().as_slice(), &[vec![1, 2, 3]]);
    }

    #[test]
    fn test_send_without_peer_callback_fails() {
        let (a, _b) = MemoryLink::pair();
        let err = a.send(&[0]).expect_err("no callback registered");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_each_direction_is_independent() {
        let (a, b) = MemoryLink::pair();
        let a_seen = Arc::new(AtomicUsize::new(0));
        let b_seen = Arc::new(AtomicUsize::new(0));

        let a_count = Arc::clone(&a_seen);
        a.set_recv_cb(Arc::new(move |_| {
            a_count.fetch_add(1, Ordering::Relaxed);
        }))
        .expect("set_recv_cb");
        let b_count = Arc::clone(&b_seen);
        b.set_recv_cb(Arc::new(move |_| {
            b_count.fetch_add(1, Ordering::Relaxed);
        }))
        .expect("set_recv_cb");

        a.send(&[1]).expect("a->b");
        a.send(&[2]).expect("a->b");
        b.send(&[3]).expect("b->a");

        assert_eq!(b_seen.load(Ordering::Relaxed), 2);
        assert_eq!(a_seen.load(Ordering::Relaxed), 1);
    }
}
