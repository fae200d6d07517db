//! Background job plumbing — cooperative shutdown and periodic ticks.
//!
//! The snapshot and reclaim jobs run on the writer's loop via
//! [`PeriodicJob`] ticks (reclamation must be serialized with the
//! writer anyway); the publisher runs on its own thread and polls the
//! shared [`Shutdown`] flag between cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag.
#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early on trigger.
    pub fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_triggered() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Interval tick tracker for jobs driven off the writer loop.
pub struct PeriodicJob {
    interval: Duration,
    last_run: Instant,
}

impl PeriodicJob {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Instant::now(),
        }
    }

    /// True once per elapsed interval.
    pub fn due(&mut self) -> bool {
        if self.last_run.elapsed() >= self.interval {
            self.last_run = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        let cloned = shutdown.clone();
        assert!(cloned.is_triggered());
    }

    #[test]
    fn test_sleep_wakes_on_trigger() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            other.trigger();
        });

        let start = Instant::now();
        shutdown.sleep(Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_periodic_job_due() {
        let mut job = PeriodicJob::new(Duration::from_millis(20));
        assert!(!job.due());
        std::thread::sleep(Duration::from_millis(25));
        assert!(job.due());
        // Immediately after firing it is no longer due
        assert!(!job.due());
    }
}
