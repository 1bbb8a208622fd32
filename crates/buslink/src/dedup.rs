// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Duplicate detection for retransmitted DATA messages.
//!
//! Receiver-side ring of recently seen message IDs. A retransmitted message
//! whose ID is still in the ring is re-acknowledged but not re-delivered to
//! the bus. The ring is a recently-seen cache, not authoritative state: an ID
//! ages out purely by being overwritten, so capacity bounds the suppression
//! window in message count, not time.
//!
//! Not internally synchronized. The single owner (the receive dispatcher)
//! serializes access behind its own lock.

/// Bounded recently-seen-ID cache (overwrite-oldest policy).
#[derive(Debug)]
pub struct DuplicateDetector {
    seen: Box<[u32]>,
    head: usize,
    len: usize,
}

impl DuplicateDetector {
    /// Create a detector remembering up to `capacity` IDs.
    ///
    /// Capacity 0 disables detection (`is_duplicate` is always false).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: vec![0u32; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Linear scan for an exact ID match.
    #[must_use]
    pub fn is_duplicate(&self, id: u32) -> bool {
        self.seen[..self.len].contains(&id)
    }

    /// Insert at the head, overwriting the oldest entry when full.
    pub fn record(&mut self, id: u32) {
        if self.seen.is_empty() {
            return;
        }
        self.seen[self.head] = id;
        self.head = (self.head + 1) % self.seen.len();
        self.len = (self.len + 1).min(self.seen.len());
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_id_is_not_duplicate() {
        let det = DuplicateDetector::new(4);
        assert!(!det.is_duplicate(7));
    }

    #[test]
    fn test_recorded_id_is_duplicate() {
        let mut det = DuplicateDetector::new(4);
        det.record(7);
        assert!(det.is_duplicate(7));
        assert!(!det.is_duplicate(8));
    }

    #[test]
    fn test_oldest_entry_ages_out() {
        let mut det = DuplicateDetector::new(3);
        det.record(1);
        det.record(2);
        det.record(3);
        assert!(det.is_duplicate(1));

        det.record(4); // overwrites 1
        assert!(!det.is_duplicate(1));
        assert!(det.is_duplicate(2));
        assert!(det.is_duplicate(3));
        assert!(det.is_duplicate(4));
    }

    #[test]
    fn test_zero_id_unseen_slots_not_matched() {
        let mut det = DuplicateDetector::new(4);
        // Backing slots are zero-initialized; an unrecorded 0 must not match.
        assert!(!det.is_duplicate(0));
        det.record(0);
        assert!(det.is_duplicate(0));
    }

    #[test]
    fn test_zero_capacity_disables_detection() {
        let mut det = DuplicateDetector::new(0);
        det.record(1);
        assert!(!det.is_duplicate(1));
    }
}
