//! Retire ring — bounded SPSC queue of retired order handles.
//!
//! The writer produces (retired handle, retire epoch) pairs; the
//! reclaimer consumes them in FIFO order. FIFO matters: the reclaimer
//! stops at the first entry that is not yet safe, because every entry
//! behind it carries a retire epoch at least as recent.
//!
//! Head and tail live on separate cache lines so the producer and the
//! consumer do not false-share.

use crate::arena::OrderHandle;
use std::sync::atomic::{AtomicU64, Ordering};

#[repr(align(64))]
struct PaddedCursor(AtomicU64);

struct Slot {
    handle: AtomicU64,
    epoch: AtomicU64,
}

pub struct RetireRing {
    /// Consumer cursor.
    head: PaddedCursor,
    /// Producer cursor.
    tail: PaddedCursor,
    slots: Box<[Slot]>,
    mask: u64,
}

impl RetireRing {
    /// Capacity must be a power of two.
    pub fn new(capacity: u64) -> Self {
        assert!(
            capacity > 0 && capacity & (capacity - 1) == 0,
            "retire ring capacity must be a power of two"
        );
        let slots = (0..capacity)
            .map(|_| Slot {
                handle: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: PaddedCursor(AtomicU64::new(0)),
            tail: PaddedCursor(AtomicU64::new(0)),
            slots,
            mask: capacity - 1,
        }
    }

    /// Producer side. Returns false when the ring is full; the caller
    /// must treat that as reclaimer starvation and fail fast.
    pub fn push(&self, handle: OrderHandle, retire_epoch: u64) -> bool {
        let t = self.tail.0.load(Ordering::Relaxed);
        let h = self.head.0.load(Ordering::Acquire);
        if t.wrapping_sub(h) == self.slots.len() as u64 {
            return false;
        }
        let slot = &self.slots[(t & self.mask) as usize];
        slot.handle.store(handle as u64, Ordering::Relaxed);
        slot.epoch.store(retire_epoch, Ordering::Relaxed);
        self.tail.0.store(t.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer side: oldest entry without removing it.
    pub fn peek(&self) -> Option<(OrderHandle, u64)> {
        let h = self.head.0.load(Ordering::Relaxed);
        let t = self.tail.0.load(Ordering::Acquire);
        if h == t {
            return None;
        }
        let slot = &self.slots[(h & self.mask) as usize];
        let handle = slot.handle.load(Ordering::Relaxed) as OrderHandle;
        let epoch = slot.epoch.load(Ordering::Relaxed);
        Some((handle, epoch))
    }

    /// Consumer side: pop the oldest entry.
    pub fn pop(&self) -> Option<(OrderHandle, u64)> {
        let entry = self.peek()?;
        let h = self.head.0.load(Ordering::Relaxed);
        self.head.0.store(h.wrapping_add(1), Ordering::Release);
        Some(entry)
    }

    pub fn len(&self) -> u64 {
        let t = self.tail.0.load(Ordering::Acquire);
        let h = self.head.0.load(Ordering::Acquire);
        t.wrapping_sub(h)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let ring = RetireRing::new(8);
        assert!(ring.push(10, 1));
        assert!(ring.push(11, 2));
        assert!(ring.push(12, 3));

        assert_eq!(ring.peek(), Some((10, 1)));
        assert_eq!(ring.pop(), Some((10, 1)));
        assert_eq!(ring.pop(), Some((11, 2)));
        assert_eq!(ring.pop(), Some((12, 3)));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_full_ring_rejects() {
        let ring = RetireRing::new(2);
        assert!(ring.push(1, 1));
        assert!(ring.push(2, 1));
        assert!(!ring.push(3, 1));

        ring.pop();
        assert!(ring.push(3, 2));
    }

    #[test]
    fn test_peek_does_not_consume() {
        let ring = RetireRing::new(4);
        ring.push(5, 9);
        assert_eq!(ring.peek(), Some((5, 9)));
        assert_eq!(ring.peek(), Some((5, 9)));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_wraparound() {
        let ring = RetireRing::new(4);
        for round in 0u64..10 {
            for i in 0..4 {
                assert!(ring.push((round * 4 + i) as u32, round));
            }
            for i in 0..4 {
                assert_eq!(ring.pop(), Some(((round * 4 + i) as u32, round)));
            }
        }
        assert!(ring.is_empty());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_non_power_of_two_panics() {
        RetireRing::new(6);
    }

    #[test]
    fn test_spsc_across_threads() {
        use std::sync::Arc;

        let ring = Arc::new(RetireRing::new(1024));
        let producer_ring = Arc::clone(&ring);
        let producer = std::thread::spawn(move || {
            for i in 0u32..10_000 {
                while !producer_ring.push(i, i as u64) {
                    std::hint::spin_loop();
                }
            }
        });

        let mut seen = 0u32;
        while seen < 10_000 {
            if let Some((h, e)) = ring.pop() {
                assert_eq!(h, seen);
                assert_eq!(e, seen as u64);
                seen += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert!(ring.is_empty());
    }
}
