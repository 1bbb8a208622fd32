// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Agent observability counters.
//!
//! All fields use relaxed atomics; consumers only need monotonic snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated across the agent's threads.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    /// DATA messages handed to the backend (fresh sends only).
    pub data_sent: AtomicU64,
    /// DATA retransmissions triggered by retry timeouts.
    pub retransmits: AtomicU64,
    /// ACK messages received for tracked entries.
    pub acks_received: AtomicU64,
    /// NACK messages received for tracked entries.
    pub nacks_received: AtomicU64,
    /// Retransmitted DATA messages suppressed by duplicate detection.
    pub duplicates_suppressed: AtomicU64,
    /// Payloads published onto local shadow channels.
    pub published: AtomicU64,
    /// Tracked messages abandoned after exhausting their attempt limit.
    pub exhausted: AtomicU64,
    /// Entries dropped because a bounded internal queue was full.
    pub queue_drops: AtomicU64,
}

/// Point-in-time copy of [`AgentMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub data_sent: u64,
    pub retransmits: u64,
    pub acks_received: u64,
    pub nacks_received: u64,
    pub duplicates_suppressed: u64,
    pub published: u64,
    pub exhausted: u64,
    pub queue_drops: u64,
}

impl AgentMetrics {
    /// Create a zeroed metrics struct ready for concurrent updates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return the current counters without synchronisation penalties.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            data_sent: self.data_sent.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            nacks_received: self.nacks_received.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
        }
    }
}
