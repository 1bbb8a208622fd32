// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Retry timer thread.
//!
//! One thread owns a deadline min-heap of pending retry timers, fed schedule
//! requests over a bounded channel. When a deadline elapses the timeout
//! handler runs on this thread; returning a new delay reschedules the same
//! handle, returning `None` retires it. Cancellation is implicit: a freed
//! tracker slot bumps its generation, so a late fire is rejected by the
//! handler's generation check instead of being raced out of the heap.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::io;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::tracker::TrackHandle;

/// Schedule channel capacity (bounded to keep a runaway sender visible).
const TIMER_CHANNEL_CAPACITY: usize = 1024;

/// Longest idle park between wakeups when the heap is empty.
const IDLE_PARK: Duration = Duration::from_millis(500);

struct Deadline {
    at: Instant,
    seq: u64,
    handle: TrackHandle,
}

// Min-heap by (deadline, insertion order) via reversed Ord.
impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Deadline {}
impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Schedule {
    handle: TrackHandle,
    delay: Duration,
}

/// Handle to the retry timer thread.
pub struct RetryTimer {
    tx: Option<Sender<Schedule>>,
    worker: Option<JoinHandle<()>>,
}

impl RetryTimer {
    /// Spawn the timer thread.
    ///
    /// `on_fire` is the timeout handler; it runs on the timer thread and must
    /// not block on I/O beyond one backend send. Returning `Some(delay)`
    /// reschedules the handle after `delay`.
    pub fn spawn<F>(name: &str, on_fire: F) -> io::Result<Self>
    where
        F: Fn(TrackHandle) -> Option<Duration> + Send + 'static,
    {
        let (tx, rx) = bounded(TIMER_CHANNEL_CAPACITY);
        let worker = std::thread::Builder::new()
            .name(format!("{}-retry", name))
            .spawn(move || Self::run_loop(&rx, &on_fire))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Arm a retry timer for a tracked handle.
    ///
    /// Best-effort: a full schedule channel is logged and dropped; the
    /// affected message then relies on its acknowledgment alone.
    pub fn schedule(&self, handle: TrackHandle, delay: Duration) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if tx.try_send(Schedule { handle, delay }).is_err() {
            log::error!("[TRACK] retry schedule channel full, timer dropped");
        }
    }

    fn run_loop<F>(rx: &Receiver<Schedule>, on_fire: &F)
    where
        F: Fn(TrackHandle) -> Option<Duration>,
    {
        let mut heap: BinaryHeap<Deadline> = BinaryHeap::new();
        let mut seq: u64 = 0;

        loop {
            // Fire everything due, rescheduling as requested.
            let now = Instant::now();
            while heap.peek().is_some_and(|d| d.at <= now) {
                if let Some(due) = heap.pop() {
                    if let Some(delay) = on_fire(due.handle) {
                        seq += 1;
                        heap.push(Deadline {
                            at: Instant::now() + delay,
                            seq,
                            handle: due.handle,
                        });
                    }
                }
            }

            let wait = heap
                .peek()
                .map_or(IDLE_PARK, |d| d.at.saturating_duration_since(now));

            match rx.recv_timeout(wait) {
                Ok(req) => {
                    seq += 1;
                    heap.push(Deadline {
                        at: Instant::now() + req.delay,
                        seq,
                        handle: req.handle,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        // Disconnect the schedule channel so the worker exits its loop.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
