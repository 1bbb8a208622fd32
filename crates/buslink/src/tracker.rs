// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Outbound tracking of in-flight DATA messages.
//!
//! Fixed-capacity slab of tracked messages, addressed by generation-stamped
//! handles. Slot allocation uses an atomic bitmap (CAS claim, idempotent
//! release); the handle generation lets a late-firing retry timer detect that
//! its slot was freed and reused, so no timer callback ever touches a stale
//! entry.
//!
//! Per-entry state machine:
//!
//! ```text
//! ACTIVE --(timeout, attempts < limit)--> ACTIVE (retransmitted, new timer)
//! ACTIVE --(ACK/NACK arrives)----------> ACKED   (awaiting cleanup)
//! ACTIVE --(attempt limit reached)-----> EXHAUSTED (awaiting cleanup)
//! ACKED/EXHAUSTED --(cleanup drain)----> removed
//! ```
//!
//! The atomic `acked` once-flag is the race arbiter between "ACK arrived" and
//! "timer fired": whichever side observes it first queues the cleanup, the
//! other becomes a no-op. Entry removal itself happens only on the agent-loop
//! thread, via the cleanup queue.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{AgentError, Result};
use crate::wire::WireMessage;

/// Handle to a tracked message slot.
///
/// The generation is bumped every time the slot is freed; a handle whose
/// generation no longer matches refers to a dead entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackHandle {
    slot: u16,
    generation: u32,
}

/// Result of marking a tracked message acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Flag set by this call; the caller is responsible for queuing cleanup.
    Marked,
    /// Flag was already set (timeout handler or a duplicate ACK won the race).
    AlreadyMarked,
    /// No tracked message with this ID (cleanup already ran).
    NotTracked,
}

/// Decision taken when a retry timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Handle refers to a freed or reused slot; nothing to do.
    Stale,
    /// ACK/NACK already arrived; cleanup is pending.
    Acked,
    /// Attempt budget spent; the caller queues the ID for cleanup.
    Exhausted { id: u32 },
    /// Retransmit the message and reschedule with backoff for `attempt`.
    Resend { msg: WireMessage, attempt: u32 },
}

struct Tracked {
    msg: WireMessage,
    attempts: u32,
}

struct Slot {
    entry: Mutex<Option<Tracked>>,
    acked: AtomicBool,
    generation: AtomicU32,
}

impl Slot {
    fn new() -> Self {
        Self {
            entry: Mutex::new(None),
            acked: AtomicBool::new(false),
            generation: AtomicU32::new(0),
        }
    }
}

/// Fixed-capacity pool of tracked messages.
pub struct TrackerPool {
    slots: Box<[Slot]>,
    /// One bit per slot; set = occupied.
    bitmap: Box<[AtomicU64]>,
}

impl TrackerPool {
    /// Create a pool with `capacity` slots (0 disables tracking).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(64);
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            bitmap: (0..words).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Pool capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of currently tracked messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bitmap
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Track a sent DATA message.
    ///
    /// Copies the message into a pool slot with the given starting attempt
    /// count (0 for a fresh send) and a cleared acknowledgment flag. Fails
    /// with [`AgentError::PoolExhausted`] when no slot is free; the caller
    /// must then treat the message as not sent.
    pub fn start_tracking(&self, msg: WireMessage, attempts: u32) -> Result<TrackHandle> {
        if self.slots.is_empty() {
            return Err(AgentError::InvalidArgument {
                reason: "tracking pool not configured".into(),
            });
        }

        let index = self.claim_slot().ok_or(AgentError::PoolExhausted)?;
        let slot = &self.slots[index];

        slot.acked.store(false, Ordering::Release);
        *slot.entry.lock() = Some(Tracked { msg, attempts });

        Ok(TrackHandle {
            slot: index as u16,
            generation: slot.generation.load(Ordering::Acquire),
        })
    }

    /// Remove the tracked message with this ID and free its slot.
    ///
    /// [`AgentError::NotFound`] is the expected outcome when the ACK/timeout
    /// race already removed the entry; callers tolerate it. Idempotent.
    pub fn stop_tracking(&self, id: u32) -> Result<()> {
        for index in self.occupied() {
            let slot = &self.slots[index];
            let mut guard = slot.entry.lock();
            match guard.as_ref() {
                Some(tracked) if tracked.msg.id == id => {
                    *guard = None;
                    // Invalidate outstanding handles before releasing the bit.
                    slot.generation.fetch_add(1, Ordering::AcqRel);
                    drop(guard);
                    self.release_slot(index);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(AgentError::NotFound { id })
    }

    /// Set the acknowledgment once-flag on the entry tracking `id`.
    pub fn mark_acknowledged(&self, id: u32) -> AckOutcome {
        for index in self.occupied() {
            let slot = &self.slots[index];
            let guard = slot.entry.lock();
            match guard.as_ref() {
                Some(tracked) if tracked.msg.id == id => {
                    return if slot.acked.swap(true, Ordering::AcqRel) {
                        AckOutcome::AlreadyMarked
                    } else {
                        AckOutcome::Marked
                    };
                }
                _ => {}
            }
        }
        AckOutcome::NotTracked
    }

    /// Timeout-handler entry point: decide what a fired retry timer does.
    ///
    /// The first action is the acknowledgment-flag check: a set flag means
    /// the ACK beat the timer and the fire is a benign race. Otherwise the
    /// attempt counter is incremented and compared against `retry_limit`
    /// (`RETRY_UNLIMITED` = -1 never exhausts).
    pub fn begin_retry(&self, handle: TrackHandle, retry_limit: i32) -> RetryDecision {
        let Some(slot) = self.slots.get(usize::from(handle.slot)) else {
            return RetryDecision::Stale;
        };
        if slot.generation.load(Ordering::Acquire) != handle.generation {
            return RetryDecision::Stale;
        }
        if slot.acked.load(Ordering::Acquire) {
            return RetryDecision::Acked;
        }

        let mut guard = slot.entry.lock();
        // Re-check under the lock: the slot may have been freed and reused
        // between the lock-free checks and the lock acquisition.
        if slot.generation.load(Ordering::Acquire) != handle.generation {
            return RetryDecision::Stale;
        }
        if slot.acked.load(Ordering::Acquire) {
            return RetryDecision::Acked;
        }
        let Some(tracked) = guard.as_mut() else {
            return RetryDecision::Stale;
        };

        tracked.attempts += 1;
        if retry_limit >= 0 && tracked.attempts >= retry_limit as u32 {
            return RetryDecision::Exhausted {
                id: tracked.msg.id,
            };
        }

        RetryDecision::Resend {
            msg: tracked.msg.clone(),
            attempt: tracked.attempts,
        }
    }

    fn claim_slot(&self) -> Option<usize> {
        for (word_index, word) in self.bitmap.iter().enumerate() {
            loop {
                let bits = word.load(Ordering::Acquire);
                let free = (!bits).trailing_zeros() as usize;
                let base_limit = self.slots.len() - word_index * 64;
                if free >= 64.min(base_limit) {
                    break; // word full, try next
                }
                let claimed = bits | (1u64 << free);
                if word
                    .compare_exchange(bits, claimed, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Some(word_index * 64 + free);
                }
                // CAS lost, retry this word
            }
        }
        None
    }

    fn release_slot(&self, index: usize) {
        let word = &self.bitmap[index / 64];
        let mask = !(1u64 << (index % 64));
        let mut bits = word.load(Ordering::Acquire);
        loop {
            match word.compare_exchange(bits, bits & mask, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => bits = actual,
            }
        }
    }

    fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.bitmap.iter().enumerate().flat_map(|(word_index, word)| {
            let mut bits = word.load(Ordering::Acquire);
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(word_index * 64 + bit)
            })
        })
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential retry backoff: `min(initial << attempt, cap)` milliseconds.
///
/// `max_ms == 0` means uncapped, in which case overflow falls back to
/// `u32::MAX` instead of wrapping. Guaranteed monotone non-decreasing in
/// `attempt`.
#[must_use]
pub fn retry_backoff_ms(initial_ms: u32, attempt: u32, max_ms: u32) -> u32 {
    let cap = if max_ms == 0 { u32::MAX } else { max_ms };
    let scaled = u64::from(initial_ms) << attempt.min(32);
    if scaled > u64::from(cap) {
        cap
    } else {
        scaled as u32
    }
}
