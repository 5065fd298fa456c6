//! RTP reorder window (jitter buffer)
//!
//! Packets are placed in a circular window indexed relative to the next
//! sequence number expected for delivery. [`RtpReorder::pop`] hands items out
//! strictly in sequence order.
//!
//! ```text
//!   next = 100                      window = 8
//!     │
//!   ┌────┬────┬────┬────┬────┬────┬────┬────┐
//!   │100 │ -- │102 │103 │ -- │ -- │ -- │ -- │
//!   └────┴────┴────┴────┴────┴────┴────┴────┘
//!   pop() -> 100, then None until 101 arrives
//! ```
//!
//! Policy:
//! - a packet behind the cursor cannot be put back in place; it is forwarded
//!   immediately or dropped depending on [`LatePacketPolicy`]
//! - a packet beyond the window advances the cursor, releasing pending older
//!   packets in order and counting the holes as lost

use std::collections::VecDeque;

use serde::Deserialize;

/// Half of the 16-bit sequence space; deltas at or above this are "behind"
const SEQ_HALF: u16 = 0x8000;

/// What to do with a packet whose sequence number is behind the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatePacketPolicy {
    /// Deliver it immediately, out of order
    #[default]
    Forward,
    /// Discard it as a duplicate or hopelessly late packet
    Drop,
}

/// Bounded reorder window
#[derive(Debug)]
pub struct RtpReorder<T> {
    slots: Vec<Option<(u16, T)>>,
    /// Slot index holding `next`
    head: usize,
    /// Next sequence number to deliver (None until the first push)
    next: Option<u16>,
    /// Items released for delivery ahead of the window
    ready: VecDeque<T>,
    pending: usize,
    policy: LatePacketPolicy,
    lost: u64,
    late: u64,
    duplicates: u64,
}

impl<T> RtpReorder<T> {
    /// Create a window holding up to `size` packets
    pub fn new(size: u16, policy: LatePacketPolicy) -> Self {
        let size = size.max(1) as usize;
        Self {
            slots: (0..size).map(|_| None).collect(),
            head: 0,
            next: None,
            ready: VecDeque::new(),
            pending: 0,
            policy,
            lost: 0,
            late: 0,
            duplicates: 0,
        }
    }

    /// Place an item at its sequence position
    pub fn push(&mut self, seq: u16, item: T) {
        let next = *self.next.get_or_insert(seq);
        let delta = seq.wrapping_sub(next);

        if delta >= SEQ_HALF {
            self.late += 1;
            match self.policy {
                LatePacketPolicy::Forward => {
                    tracing::trace!(seq, next, "Late RTP packet forwarded");
                    self.ready.push_back(item);
                }
                LatePacketPolicy::Drop => {
                    tracing::debug!(seq, next, "Late RTP packet dropped");
                }
            }
            return;
        }

        let window = self.slots.len();
        if delta as usize >= window {
            if self.pending == 0 {
                self.lost += delta as u64;
                self.next = Some(seq);
                tracing::debug!(from = next, to = seq, "Reorder window jumped");
            } else {
                self.advance_to(seq.wrapping_sub(window as u16 - 1));
            }
        }

        let next = self.next.unwrap_or(seq);
        let idx = (self.head + seq.wrapping_sub(next) as usize) % window;
        match &self.slots[idx] {
            Some((existing, _)) if *existing == seq => {
                self.duplicates += 1;
                return;
            }
            Some(_) => {}
            None => self.pending += 1,
        }
        self.slots[idx] = Some((seq, item));
    }

    /// Take the next in-order item, if it has arrived
    pub fn pop(&mut self) -> Option<T> {
        if let Some(item) = self.ready.pop_front() {
            return Some(item);
        }

        let next = self.next?;
        match &self.slots[self.head] {
            Some((seq, _)) if *seq == next => {}
            _ => return None,
        }

        let (_, item) = self.slots[self.head].take()?;
        self.pending -= 1;
        self.step();
        Some(item)
    }

    /// Release everything still pending, in sequence order, skipping holes
    pub fn drain(&mut self) -> Vec<T> {
        let mut out: Vec<T> = self.ready.drain(..).collect();
        let window = self.slots.len();
        for i in 0..window {
            if let Some((_, item)) = self.slots[(self.head + i) % window].take() {
                out.push(item);
            }
        }
        self.pending = 0;
        self.next = None;
        self.head = 0;
        out
    }

    /// Forget all state; the next push restarts the sequence
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.ready.clear();
        self.pending = 0;
        self.next = None;
        self.head = 0;
    }

    /// Window length
    pub fn window(&self) -> usize {
        self.slots.len()
    }

    /// Number of items waiting for earlier sequence numbers
    pub fn pending(&self) -> usize {
        self.pending + self.ready.len()
    }

    /// Sequence numbers skipped because the window overflowed
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Packets that arrived behind the cursor
    pub fn late(&self) -> u64 {
        self.late
    }

    /// Packets that arrived twice while still pending
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Move the cursor forward to `target`, releasing pending items in order
    fn advance_to(&mut self, target: u16) {
        let Some(next) = self.next else {
            self.next = Some(target);
            return;
        };
        let distance = target.wrapping_sub(next);

        for step in 0..distance {
            if self.pending == 0 {
                // Window is empty; skip the remaining holes at once
                self.lost += (distance - step) as u64;
                self.next = Some(target);
                break;
            }
            match self.slots[self.head].take() {
                Some((_, item)) => {
                    self.pending -= 1;
                    self.ready.push_back(item);
                }
                None => self.lost += 1,
            }
            self.step();
        }
        tracing::debug!(from = next, to = target, "Reorder window flushed");
    }

    fn step(&mut self) {
        self.head = (self.head + 1) % self.slots.len();
        self.next = self.next.map(|n| n.wrapping_add(1));
    }
}

/// Sequence continuity check used when reordering is disabled
///
/// Tolerates a single stray packet between two consecutive ones (some
/// sources interleave RTCP written as RTP); the stray packet itself is
/// reported as a discontinuity.
#[derive(Debug, Default, Clone)]
pub struct ContinuityCheck {
    last: Option<u16>,
    before_last: Option<u16>,
    discontinuities: u64,
}

impl ContinuityCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq`; returns false if it does not follow the previous packet
    pub fn check(&mut self, seq: u16) -> bool {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return true;
        };

        if self.before_last.map(|b| b.wrapping_add(1)) == Some(seq) {
            self.last = Some(seq);
            return true;
        }

        self.before_last = Some(last);
        self.last = Some(seq);
        if seq != last.wrapping_add(1) {
            self.discontinuities += 1;
            return false;
        }
        true
    }

    /// Number of discontinuities seen
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.before_last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pop_all<T>(reorder: &mut RtpReorder<T>) -> Vec<T> {
        std::iter::from_fn(|| reorder.pop()).collect()
    }

    #[test]
    fn test_reorder_out_of_order() {
        let mut reorder = RtpReorder::new(4, LatePacketPolicy::Forward);
        for seq in [100u16, 102, 101, 103] {
            reorder.push(seq, seq);
        }

        assert_eq!(pop_all(&mut reorder), vec![100, 101, 102, 103]);
        assert_eq!(reorder.pending(), 0);
    }

    #[test]
    fn test_reorder_interleaved_push_pop() {
        let mut reorder = RtpReorder::new(8, LatePacketPolicy::Forward);
        let mut out = Vec::new();

        for seq in [10u16, 12, 13, 11, 14] {
            reorder.push(seq, seq);
            out.extend(pop_all(&mut reorder));
        }

        assert_eq!(out, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_reorder_wraparound() {
        let mut reorder = RtpReorder::new(4, LatePacketPolicy::Forward);
        for seq in [65535u16, 0, 1] {
            reorder.push(seq, seq);
        }
        assert_eq!(pop_all(&mut reorder), vec![65535, 0, 1]);

        // Out of order across the wrap, with a window that does not divide 65536
        let mut reorder = RtpReorder::new(50, LatePacketPolicy::Forward);
        for seq in [65534u16, 0, 65535, 2, 1] {
            reorder.push(seq, seq);
        }
        assert_eq!(pop_all(&mut reorder), vec![65534, 65535, 0, 1, 2]);
    }

    #[test]
    fn test_reorder_waits_for_gap() {
        let mut reorder = RtpReorder::new(8, LatePacketPolicy::Forward);
        reorder.push(1, 1);
        reorder.push(3, 3);

        assert_eq!(reorder.pop(), Some(1));
        assert_eq!(reorder.pop(), None);
        assert_eq!(reorder.pending(), 1);

        reorder.push(2, 2);
        assert_eq!(pop_all(&mut reorder), vec![2, 3]);
    }

    #[test]
    fn test_reorder_overflow_flushes_older() {
        let mut reorder = RtpReorder::new(4, LatePacketPolicy::Forward);
        reorder.push(0, 0);
        assert_eq!(reorder.pop(), Some(0));

        // 1 is lost; 2 and 3 wait for it
        reorder.push(2, 2);
        reorder.push(3, 3);
        assert_eq!(reorder.pop(), None);

        // 6 does not fit in [1, 4]; the cursor moves to 3 releasing 2
        reorder.push(6, 6);
        assert_eq!(pop_all(&mut reorder), vec![2, 3]);
        assert_eq!(reorder.lost(), 1);

        reorder.push(4, 4);
        reorder.push(5, 5);
        assert_eq!(pop_all(&mut reorder), vec![4, 5, 6]);
    }

    #[test]
    fn test_reorder_large_jump_without_pending() {
        let mut reorder = RtpReorder::new(4, LatePacketPolicy::Forward);
        reorder.push(10, 10);
        assert_eq!(reorder.pop(), Some(10));

        reorder.push(1000, 1000);
        assert_eq!(reorder.pop(), Some(1000));
        assert_eq!(reorder.lost(), 989);
    }

    #[test]
    fn test_late_packet_forwarded() {
        let mut reorder = RtpReorder::new(4, LatePacketPolicy::Forward);
        reorder.push(5, 5);
        reorder.push(6, 6);
        assert_eq!(pop_all(&mut reorder), vec![5, 6]);

        reorder.push(4, 4);
        assert_eq!(reorder.pop(), Some(4));
        assert_eq!(reorder.late(), 1);
    }

    #[test]
    fn test_late_packet_dropped() {
        let mut reorder = RtpReorder::new(4, LatePacketPolicy::Drop);
        reorder.push(5, 5);
        assert_eq!(reorder.pop(), Some(5));

        reorder.push(5, 5);
        reorder.push(3, 3);
        assert_eq!(reorder.pop(), None);
        assert_eq!(reorder.late(), 2);
    }

    #[test]
    fn test_duplicate_pending_ignored() {
        let mut reorder = RtpReorder::new(4, LatePacketPolicy::Forward);
        reorder.push(1, "a");
        reorder.push(3, "b");
        reorder.push(3, "c");

        assert_eq!(reorder.duplicates(), 1);
        assert_eq!(reorder.drain(), vec!["a", "b"]);
        assert_eq!(reorder.pop(), None);
    }

    #[test]
    fn test_continuity_check() {
        let mut check = ContinuityCheck::new();
        assert!(check.check(10));
        assert!(check.check(11));
        assert!(check.check(12));

        // Stray packet between 12 and 13
        assert!(!check.check(500));
        assert!(check.check(13));
        assert!(check.check(14));

        // Real gap
        assert!(!check.check(20));
        assert_eq!(check.discontinuities(), 2);

        // Wraparound is continuous
        let mut check = ContinuityCheck::new();
        assert!(check.check(65535));
        assert!(check.check(0));
        assert_eq!(check.discontinuities(), 0);
    }
}
