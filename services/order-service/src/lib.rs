//! Order service — single-writer orchestration of the durability
//! pipeline: sequence → entry WAL → matching → outbox → response.
//!
//! # Modules
//! - `sequencer`: monotonic id generator, resumable after replay
//! - `service`: the place pipeline, snapshot query, epoch advance
//! - `recovery`: startup snapshot load + WAL tail replay
//! - `publisher`: outbox drain toward the broker sink
//! - `jobs`: shutdown flag and periodic tick plumbing

pub mod jobs;
pub mod publisher;
pub mod recovery;
pub mod sequencer;
pub mod service;

pub use jobs::{PeriodicJob, Shutdown};
pub use publisher::{EventSink, LogSink, PublishStats, Publisher, SinkError};
pub use recovery::RecoveryReport;
pub use sequencer::Sequencer;
pub use service::{OrderService, OrderView, ServiceConfig, ServiceError};
