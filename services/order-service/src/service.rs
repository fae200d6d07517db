//! OrderService — the single write entrypoint.
//!
//! Strict order per placement, non-negotiable:
//! 1. sequence id
//! 2. entry-WAL append + fsync (hard fail: the client retries, the seq
//!    slot is burned — replay tolerates gaps)
//! 3. matching
//! 4. exit-log outbox write (soft fail: warn and continue, the order
//!    exists either way)
//! 5. retire the taker if fully filled
//!
//! A client response therefore implies every earlier write is durable.

use crate::recovery::{self, RecoveryReport};
use crate::sequencer::Sequencer;
use matching_engine::book::order_book::retire_order;
use matching_engine::{
    advance_and_reclaim, BookError, EpochTracker, OrderArena, OrderBook, PlaceOutcome,
    ReaderSlot, RetireRing,
};
use persistence::snapshot::{self, SnapshotEntry, SnapshotFile};
use persistence::{
    EntryWal, Outbox, OutboxError, RecordType, SnapshotError, WalConfig, WalError, WalRecord,
};
use std::path::PathBuf;
use thiserror::Error;
use types::{OrderAccepted, OrderError, OrderStatus, OrderType, PlaceIntent, Side};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    Invalid(#[from] OrderError),

    #[error("entry WAL failure: {0}")]
    Wal(#[from] WalError),

    #[error("exit log failure: {0}")]
    Outbox(#[from] OutboxError),

    #[error("snapshot failure: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("book failure: {0}")]
    Book(#[from] BookError),

    #[error("order pool exhausted (capacity {capacity})")]
    PoolExhausted { capacity: u32 },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base directory; the WAL, exit log, and snapshots live beneath it.
    pub data_dir: PathBuf,
    pub pool_capacity: u32,
    /// Power of two.
    pub ring_capacity: u64,
    pub segment_size: u64,
}

impl ServiceConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            pool_capacity: 65_536,
            ring_capacity: 65_536,
            segment_size: 64 * 1024 * 1024,
        }
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal_entry")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.data_dir.join("wal_exit")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

/// Read-only view of one resting order, copied out under an epoch pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderView {
    pub id: u64,
    pub side: Side,
    pub order_type: OrderType,
    pub price: i64,
    pub qty: i64,
    pub filled: i64,
}

impl OrderView {
    pub fn remaining(&self) -> i64 {
        self.qty - self.filled
    }
}

pub struct OrderService {
    config: ServiceConfig,
    arena: OrderArena,
    ring: RetireRing,
    epochs: EpochTracker,
    reader: ReaderSlot,
    book: OrderBook,
    sequencer: Sequencer,
    entry_wal: EntryWal,
    outbox: Outbox,
    recovery: RecoveryReport,
}

impl OrderService {
    /// Open the stores, rebuild the book from snapshot + WAL tail, and
    /// resume the sequencer. Must complete before any traffic.
    pub fn open(config: ServiceConfig) -> Result<Self, ServiceError> {
        let mut wal_config = WalConfig::new(config.wal_dir());
        wal_config.segment_size = config.segment_size;
        let entry_wal = EntryWal::open(wal_config)?;
        let outbox = Outbox::open(&config.outbox_dir())?;

        let mut arena = OrderArena::new(config.pool_capacity);
        let ring = RetireRing::new(config.ring_capacity);
        let epochs = EpochTracker::new();
        let mut book = OrderBook::new();
        let sequencer = Sequencer::new(0);

        let recovery = recovery::recover(
            &mut book,
            &mut arena,
            &ring,
            &epochs,
            &sequencer,
            &config.snapshot_dir(),
            &config.wal_dir(),
        )?;

        Ok(Self {
            config,
            arena,
            ring,
            epochs,
            reader: ReaderSlot::new(),
            book,
            sequencer,
            entry_wal,
            outbox,
            recovery,
        })
    }

    /// The startup recovery summary.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Place an order through the full durability pipeline. Returns the
    /// committed sequence number.
    pub fn place_order(
        &mut self,
        side: Side,
        order_type: OrderType,
        price: i64,
        qty: i64,
        user_id: u64,
    ) -> Result<u64, ServiceError> {
        // Protocol validation happens before any durability side effect.
        if qty <= 0 {
            return Err(OrderError::InvalidQuantity(qty).into());
        }
        if order_type != OrderType::Market && price <= 0 {
            return Err(OrderError::InvalidPrice(price).into());
        }

        // 1. sequence
        let seq = self.sequencer.next();

        // 2. durable intent
        let intent = PlaceIntent {
            user_id,
            side,
            order_type,
            price,
            qty,
        };
        let record = WalRecord::new(
            RecordType::Place,
            seq,
            unix_now_ns(),
            intent.encode().to_vec(),
        );
        self.entry_wal.append(&record)?;
        self.entry_wal.sync()?;

        // 3. matching
        let handle = self.arena.alloc().ok_or(ServiceError::PoolExhausted {
            capacity: self.arena.capacity(),
        })?;
        {
            let o = self.arena.get_mut(handle);
            o.id = seq;
            o.seq = seq;
            o.side = side;
            o.order_type = order_type;
            o.price = price;
            o.qty = qty;
            o.status = OrderStatus::Active;
        }
        let outcome = self
            .book
            .place(&mut self.arena, &self.ring, &self.epochs, handle)?;

        // 4. outbox event; the publisher takes it from here
        let event = OrderAccepted::new(seq, side, order_type, price, qty);
        if let Err(err) = self.outbox.put_new(seq, event.to_json()) {
            tracing::warn!(
                seq,
                error = %err,
                "exit log write failed; order placed but will not be published"
            );
        }

        // 5. fully filled takers retire immediately
        if outcome == PlaceOutcome::Filled {
            retire_order(&mut self.arena, &self.ring, &self.epochs, handle)?;
        }

        Ok(seq)
    }

    /// Reserved: cancel is declared in the data model and WAL schema but
    /// has no matching semantics yet. Always reports success.
    pub fn cancel_order(&mut self, _order_id: u64, _price: i64) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Consistent view of all Active orders: bids descending, then asks
    /// ascending. Fields are copied out under an epoch reader pin.
    pub fn snapshot(&self) -> Vec<OrderView> {
        let _guard = self.reader.pin(&self.epochs);

        let mut out = Vec::with_capacity(1024);
        let arena = &self.arena;
        self.book.walk_bids_desc(|level| {
            for order in level.orders(arena) {
                if order.status == OrderStatus::Active {
                    out.push(OrderView {
                        id: order.id,
                        side: order.side,
                        order_type: order.order_type,
                        price: order.price,
                        qty: order.qty,
                        filled: order.filled,
                    });
                }
            }
            true
        });
        self.book.walk_asks_asc(|level| {
            for order in level.orders(arena) {
                if order.status == OrderStatus::Active {
                    out.push(OrderView {
                        id: order.id,
                        side: order.side,
                        order_type: order.order_type,
                        price: order.price,
                        qty: order.qty,
                        filled: order.filled,
                    });
                }
            }
            true
        });
        out
    }

    /// Write a snapshot of the current book at `sequencer.current()`,
    /// then drop WAL segments the snapshot has made redundant.
    /// Returns the captured seq.
    pub fn write_snapshot(&mut self, created_ns: u64) -> Result<u64, ServiceError> {
        let seq = self.sequencer.current();
        let entries = self.collect_snapshot_entries();
        let file = SnapshotFile {
            seq,
            created_ns,
            entries,
        };
        snapshot::write(&self.config.snapshot_dir(), &file)?;
        let removed = self.entry_wal.truncate_before(seq)?;
        tracing::info!(seq, segments_removed = removed, "snapshot written");
        Ok(seq)
    }

    /// One reclaim cycle over the retire ring.
    pub fn advance_epoch(&mut self) -> usize {
        advance_and_reclaim(&self.epochs, &self.ring, &mut self.arena, &[&self.reader])
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Last issued sequence number.
    pub fn current_seq(&self) -> u64 {
        self.sequencer.current()
    }

    /// Retired orders awaiting reclamation.
    pub fn pending_reclaim(&self) -> u64 {
        self.ring.len()
    }

    /// Live order slots.
    pub fn allocated_orders(&self) -> u32 {
        self.arena.allocated()
    }

    fn collect_snapshot_entries(&self) -> Vec<SnapshotEntry> {
        let _guard = self.reader.pin(&self.epochs);

        let mut entries = Vec::with_capacity(1024);
        let arena = &self.arena;
        let mut push_level = |level: &matching_engine::PriceLevel| {
            for order in level.orders(arena) {
                if order.status == OrderStatus::Active {
                    entries.push(SnapshotEntry {
                        id: order.id,
                        side: order.side.as_u8(),
                        order_type: order.order_type.as_u8(),
                        price: order.price,
                        qty: order.remaining(),
                    });
                }
            }
            true
        };
        self.book.walk_bids_desc(&mut push_level);
        self.book.walk_asks_asc(&mut push_level);
        entries
    }
}

/// Wall-clock nanoseconds since the Unix epoch.
pub fn unix_now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
