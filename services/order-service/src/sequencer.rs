//! Sequencer — strictly monotonic u64 id generator.
//!
//! `next` is called only by the single writer in practice, but the
//! counter is atomic so `current` can be read from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    /// Start from `last`: the first `next()` returns `last + 1`.
    /// Fresh start is `new(0)`.
    pub fn new(last: u64) -> Self {
        Self {
            next: AtomicU64::new(last),
        }
    }

    /// Issue the next sequence number.
    #[inline]
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Last issued sequence number.
    #[inline]
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Resume after replay; `next()` continues from `last + 1`.
    pub fn reset(&self, last: u64) {
        self.next.store(last, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_start() {
        let seq = Sequencer::new(0);
        assert_eq!(seq.current(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn test_reset_resumes_after_replay() {
        let seq = Sequencer::new(0);
        seq.reset(41);
        assert_eq!(seq.current(), 41);
        assert_eq!(seq.next(), 42);
    }

    #[test]
    fn test_monotonic_across_threads() {
        use std::sync::Arc;

        let seq = Arc::new(Sequencer::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let seq = Arc::clone(&seq);
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| seq.next()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000, "issued ids must be unique");
        assert_eq!(seq.current(), 4000);
    }
}
