//! Durability layer for the lokis engine.
//!
//! Three stores with byte-exact on-disk contracts:
//! - the segmented entry WAL (accepted intents, CRC-framed),
//! - the sled-backed exit log (outbox entries keyed by seq),
//! - the snapshot file (Active orders at a seq, atomic replace).
//!
//! Replay enforces strict seq monotonicity and treats corruption as
//! fatal; the startup path is the only consumer.

pub mod index;
pub mod outbox;
pub mod replay;
pub mod snapshot;
pub mod wal;

pub use outbox::{Outbox, OutboxError, OutboxRecord, OutboxState};
pub use snapshot::{SnapshotEntry, SnapshotError, SnapshotFile};
pub use wal::{
    EntryWal, FlushPolicy, FsyncPolicy, RecordType, WalConfig, WalError, WalRecord,
};
