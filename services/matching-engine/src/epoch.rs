//! Epoch-based reclamation.
//!
//! A process-wide epoch counter advances on every reclaim cycle. Readers
//! stamp their slot with the epoch observed on entry and the idle
//! sentinel on exit. An object retired at epoch `e` may be reused once
//! every live reader entered at an epoch strictly greater than `e`: the
//! object's book links were severed before `e`, so no such reader can
//! still reach it.
//!
//! Ordering requirement: the reclaim cycle loads the minimum reader
//! epoch only after incrementing the global epoch, and writers stamp
//! `retire_epoch` from a fresh load of the global counter.

use crate::arena::OrderArena;
use crate::ring::RetireRing;
use std::sync::atomic::{AtomicU64, Ordering};

/// Reader-slot value meaning "not inside a read section".
pub const IDLE_EPOCH: u64 = u64::MAX;

/// Process-wide monotonically increasing epoch counter.
pub struct EpochTracker {
    global: AtomicU64,
}

impl EpochTracker {
    pub fn new() -> Self {
        Self {
            global: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }

    /// Increment the global epoch, returning the new value.
    #[inline]
    pub fn advance(&self) -> u64 {
        self.global.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for EpochTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// One reader's epoch registration slot.
pub struct ReaderSlot {
    epoch: AtomicU64,
}

impl ReaderSlot {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU64::new(IDLE_EPOCH),
        }
    }

    /// Mark entry into a read section.
    #[inline]
    pub fn enter(&self, tracker: &EpochTracker) {
        self.epoch.store(tracker.current(), Ordering::Release);
    }

    /// Mark exit from a read section.
    #[inline]
    pub fn exit(&self) {
        self.epoch.store(IDLE_EPOCH, Ordering::Release);
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// RAII read section; exits on drop.
    pub fn pin<'a>(&'a self, tracker: &EpochTracker) -> ReaderGuard<'a> {
        self.enter(tracker);
        ReaderGuard { slot: self }
    }
}

impl Default for ReaderSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReaderGuard<'a> {
    slot: &'a ReaderSlot,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.slot.exit();
    }
}

/// Minimum epoch across the reader set; [`IDLE_EPOCH`] when all idle.
pub fn min_reader_epoch<'a>(readers: impl IntoIterator<Item = &'a ReaderSlot>) -> u64 {
    readers
        .into_iter()
        .map(|r| r.value())
        .min()
        .unwrap_or(IDLE_EPOCH)
}

/// One reclaim cycle: advance the epoch, then drain the retire ring
/// head-first while the head entry's retire epoch precedes every live
/// reader. Returns the number of slots returned to the arena.
///
/// Takes the arena by `&mut`, which serializes reclamation with the
/// writer.
pub fn advance_and_reclaim(
    tracker: &EpochTracker,
    ring: &RetireRing,
    arena: &mut OrderArena,
    readers: &[&ReaderSlot],
) -> usize {
    tracker.advance();
    let min = min_reader_epoch(readers.iter().copied());

    let mut reclaimed = 0;
    while let Some((handle, retire_epoch)) = ring.peek() {
        if min != IDLE_EPOCH && retire_epoch >= min {
            // Not safe yet; FIFO guarantees newer entries aren't either.
            break;
        }
        ring.pop();
        arena.free(handle);
        reclaimed += 1;
    }
    reclaimed
}
