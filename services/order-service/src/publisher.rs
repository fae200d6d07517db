//! Outbox publisher — drains the exit log toward the broker.
//!
//! The broker is an opaque [`EventSink`]; delivery is at-least-once and
//! consumers dedupe by seq. Each cycle scans pending entries in seq
//! order, marks Sent *before* publishing (a crash in between leaves a
//! Sent entry that is safely re-published), then marks Acked or Failed.
//! Failed entries wait out a bounded exponential backoff keyed on their
//! retry count before the next attempt.

use crate::jobs::Shutdown;
use crate::service::unix_now_ns;
use persistence::{Outbox, OutboxRecord, OutboxState};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

/// Where accepted-order events go. Implementations must be idempotent
/// per seq.
pub trait EventSink: Send + Sync {
    fn publish(&self, seq: u64, payload: &[u8]) -> Result<(), SinkError>;
}

/// Sink that just logs; stands in for the broker in the demo binary.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, seq: u64, payload: &[u8]) -> Result<(), SinkError> {
        tracing::info!(seq, bytes = payload.len(), "publishing order event");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub published: usize,
    pub failed: usize,
    /// Entries still inside their backoff window.
    pub deferred: usize,
}

pub struct Publisher {
    outbox: Outbox,
    sink: Arc<dyn EventSink>,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl Publisher {
    pub fn new(outbox: Outbox, sink: Arc<dyn EventSink>) -> Self {
        Self {
            outbox,
            sink,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// One pass over the pending entries. `now_ns` drives the backoff
    /// window so tests can run on a synthetic clock.
    pub fn run_cycle(&self, now_ns: u64) -> PublishStats {
        let mut stats = PublishStats::default();

        let mut pending: Vec<(u64, OutboxRecord)> = Vec::new();
        if let Err(err) = self.outbox.scan_pending(|seq, record| {
            pending.push((seq, record.clone()));
            Ok(())
        }) {
            tracing::warn!(error = %err, "outbox scan failed");
            return stats;
        }

        for (seq, record) in pending {
            if record.state == OutboxState::Failed
                && record.last_attempt_ns + self.backoff_ns(record.retries) > now_ns
            {
                stats.deferred += 1;
                continue;
            }

            if let Err(err) = self
                .outbox
                .mark(seq, OutboxState::Sent, record.retries, now_ns)
            {
                tracing::warn!(seq, error = %err, "failed to mark outbox entry sent");
                continue;
            }

            match self.sink.publish(seq, &record.payload) {
                Ok(()) => {
                    if let Err(err) =
                        self.outbox
                            .mark(seq, OutboxState::Acked, record.retries, now_ns)
                    {
                        tracing::warn!(seq, error = %err, "failed to ack outbox entry");
                    } else {
                        stats.published += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(seq, retries = record.retries, error = %err, "publish failed");
                    if let Err(mark_err) =
                        self.outbox
                            .mark(seq, OutboxState::Failed, record.retries + 1, now_ns)
                    {
                        tracing::warn!(seq, error = %mark_err, "failed to mark outbox entry failed");
                    }
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// Run cycles on a dedicated thread until shutdown.
    pub fn spawn(self, interval: Duration, shutdown: Shutdown) -> JoinHandle<()> {
        std::thread::spawn(move || {
            tracing::info!("publisher started");
            while !shutdown.is_triggered() {
                self.run_cycle(unix_now_ns());
                shutdown.sleep(interval);
            }
            tracing::info!("publisher stopped");
        })
    }

    fn backoff_ns(&self, retries: u32) -> u64 {
        let exp = retries.min(16);
        let backoff = self
            .base_backoff
            .saturating_mul(1u32 << exp.min(16))
            .min(self.max_backoff);
        backoff.as_nanos() as u64
    }
}
