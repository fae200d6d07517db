//! Startup recovery — snapshot load plus entry-WAL tail replay.
//!
//! Order of operations:
//! 1. load the snapshot, enqueuing entries straight into their levels
//!    (the matcher never runs on snapshot data);
//! 2. replay WAL records, skipping any with `seq <= snapshot.seq`; the
//!    tail re-runs the matcher exactly as the live path did;
//! 3. resume the sequencer at the highest seq seen.
//!
//! Replay runs before any reader exists, so retirements produced along
//! the way are drained back into the pool eagerly.

use crate::sequencer::Sequencer;
use crate::service::ServiceError;
use matching_engine::book::order_book::retire_order;
use matching_engine::{
    advance_and_reclaim, EpochTracker, OrderArena, OrderBook, PlaceOutcome, RetireRing,
};
use persistence::{replay, snapshot, RecordType, WalError};
use std::path::Path;
use types::{OrderStatus, OrderType, PlaceIntent, Side};

/// Summary of one recovery run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Seq captured by the loaded snapshot; 0 when none existed.
    pub snapshot_seq: u64,
    /// Orders restored from the snapshot.
    pub restored_orders: u64,
    /// WAL records re-applied after the snapshot.
    pub replayed_records: u64,
    /// Highest seq seen; the sequencer resumes here.
    pub last_seq: u64,
}

pub(crate) fn recover(
    book: &mut OrderBook,
    arena: &mut OrderArena,
    ring: &RetireRing,
    epochs: &EpochTracker,
    sequencer: &Sequencer,
    snapshot_dir: &Path,
    wal_dir: &Path,
) -> Result<RecoveryReport, ServiceError> {
    let mut report = RecoveryReport::default();

    if let Some(file) = snapshot::load(snapshot_dir)? {
        report.snapshot_seq = file.seq;
        for entry in &file.entries {
            let side = Side::from_u8(entry.side)?;
            let order_type = OrderType::from_u8(entry.order_type)?;
            let handle = arena.alloc().ok_or(ServiceError::PoolExhausted {
                capacity: arena.capacity(),
            })?;
            {
                let o = arena.get_mut(handle);
                o.id = entry.id;
                o.seq = entry.id;
                o.side = side;
                o.order_type = order_type;
                o.price = entry.price;
                o.qty = entry.qty;
                o.status = OrderStatus::Active;
            }
            book.restore(arena, handle);
            report.restored_orders += 1;
        }
        tracing::info!(
            seq = file.seq,
            orders = report.restored_orders,
            "snapshot loaded"
        );
    } else {
        tracing::info!("no snapshot found, starting from empty book");
    }

    let snapshot_seq = report.snapshot_seq;
    let mut replayed = 0u64;
    let drain_mark = ring.capacity() / 2;

    let wal_last = replay::replay(wal_dir, |record| {
        if record.seq <= snapshot_seq {
            return Ok(());
        }
        if record.record_type != RecordType::Place {
            // Cancel semantics are reserved; the record is a no-op.
            return Ok(());
        }

        let intent = PlaceIntent::decode(&record.payload)
            .map_err(|e| WalError::Apply(e.to_string()))?;

        let handle = arena
            .alloc()
            .ok_or_else(|| WalError::Apply("order pool exhausted during replay".into()))?;
        {
            let o = arena.get_mut(handle);
            o.id = record.seq;
            o.seq = record.seq;
            o.side = intent.side;
            o.order_type = intent.order_type;
            o.price = intent.price;
            o.qty = intent.qty;
            o.status = OrderStatus::Active;
        }
        let outcome = book
            .place(arena, ring, epochs, handle)
            .map_err(|e| WalError::Apply(e.to_string()))?;
        if outcome == PlaceOutcome::Filled {
            retire_order(arena, ring, epochs, handle)
                .map_err(|e| WalError::Apply(e.to_string()))?;
        }
        replayed += 1;

        // No readers yet: keep the ring from filling mid-replay.
        if ring.len() >= drain_mark {
            advance_and_reclaim(epochs, ring, arena, &[]);
        }
        Ok(())
    })?;

    advance_and_reclaim(epochs, ring, arena, &[]);

    report.replayed_records = replayed;
    report.last_seq = snapshot_seq.max(wal_last);
    sequencer.reset(report.last_seq);

    tracing::info!(
        snapshot_seq = report.snapshot_seq,
        replayed = report.replayed_records,
        last_seq = report.last_seq,
        "recovery complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::snapshot::{SnapshotEntry, SnapshotFile};
    use persistence::{EntryWal, WalConfig, WalRecord};
    use tempfile::TempDir;

    struct Parts {
        book: OrderBook,
        arena: OrderArena,
        ring: RetireRing,
        epochs: EpochTracker,
        sequencer: Sequencer,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                book: OrderBook::new(),
                arena: OrderArena::new(1024),
                ring: RetireRing::new(1024),
                epochs: EpochTracker::new(),
                sequencer: Sequencer::new(0),
            }
        }

        fn recover(&mut self, snapshot_dir: &Path, wal_dir: &Path) -> RecoveryReport {
            recover(
                &mut self.book,
                &mut self.arena,
                &self.ring,
                &self.epochs,
                &self.sequencer,
                snapshot_dir,
                wal_dir,
            )
            .unwrap()
        }
    }

    fn append_place(wal: &mut EntryWal, seq: u64, side: Side, price: i64, qty: i64) {
        let intent = PlaceIntent {
            user_id: 1,
            side,
            order_type: OrderType::Limit,
            price,
            qty,
        };
        wal.append(&WalRecord::new(
            RecordType::Place,
            seq,
            seq * 1_000,
            intent.encode().to_vec(),
        ))
        .unwrap();
    }

    #[test]
    fn test_cold_start_empty() {
        let tmp = TempDir::new().unwrap();
        let mut parts = Parts::new();
        let report = parts.recover(&tmp.path().join("snapshots"), &tmp.path().join("wal"));
        assert_eq!(report.last_seq, 0);
        assert_eq!(report.replayed_records, 0);
        assert_eq!(parts.sequencer.current(), 0);
    }

    #[test]
    fn test_replay_rebuilds_book_and_sequencer() {
        let tmp = TempDir::new().unwrap();
        let wal_dir = tmp.path().join("wal");
        {
            let mut wal = EntryWal::open(WalConfig::new(&wal_dir)).unwrap();
            append_place(&mut wal, 1, Side::Bid, 100, 5);
            append_place(&mut wal, 2, Side::Ask, 100, 3);
            append_place(&mut wal, 3, Side::Ask, 105, 2);
            wal.sync().unwrap();
        }

        let mut parts = Parts::new();
        let report = parts.recover(&tmp.path().join("snapshots"), &wal_dir);

        assert_eq!(report.replayed_records, 3);
        assert_eq!(report.last_seq, 3);
        assert_eq!(parts.sequencer.current(), 3);
        assert_eq!(parts.sequencer.next(), 4);

        // Matching re-ran: the ask at 100 crossed the bid
        assert_eq!(parts.book.best_bid(), Some((100, 2)));
        assert_eq!(parts.book.best_ask(), Some((105, 2)));
        // Replay retirements were drained back into the pool
        assert!(parts.ring.is_empty());
    }

    #[test]
    fn test_snapshot_plus_tail() {
        let tmp = TempDir::new().unwrap();
        let snap_dir = tmp.path().join("snapshots");
        let wal_dir = tmp.path().join("wal");

        snapshot::write(
            &snap_dir,
            &SnapshotFile {
                seq: 2,
                created_ns: 0,
                entries: vec![SnapshotEntry {
                    id: 2,
                    side: Side::Bid.as_u8(),
                    order_type: OrderType::Limit.as_u8(),
                    price: 100,
                    qty: 5,
                }],
            },
        )
        .unwrap();

        {
            let mut wal = EntryWal::open(WalConfig::new(&wal_dir)).unwrap();
            // Covered by the snapshot: must be skipped
            append_place(&mut wal, 1, Side::Ask, 150, 1);
            append_place(&mut wal, 2, Side::Bid, 100, 5);
            // The tail
            append_place(&mut wal, 3, Side::Ask, 100, 2);
            wal.sync().unwrap();
        }

        let mut parts = Parts::new();
        let report = parts.recover(&snap_dir, &wal_dir);

        assert_eq!(report.snapshot_seq, 2);
        assert_eq!(report.restored_orders, 1);
        assert_eq!(report.replayed_records, 1);
        assert_eq!(report.last_seq, 3);
        // Tail ask crossed the restored bid
        assert_eq!(parts.book.best_bid(), Some((100, 3)));
        assert_eq!(parts.book.best_ask(), None);
    }

    #[test]
    fn test_snapshot_newer_than_wal() {
        let tmp = TempDir::new().unwrap();
        let snap_dir = tmp.path().join("snapshots");
        let wal_dir = tmp.path().join("wal");

        snapshot::write(
            &snap_dir,
            &SnapshotFile {
                seq: 9,
                created_ns: 0,
                entries: vec![],
            },
        )
        .unwrap();
        {
            let mut wal = EntryWal::open(WalConfig::new(&wal_dir)).unwrap();
            append_place(&mut wal, 4, Side::Bid, 10, 1);
            wal.sync().unwrap();
        }

        let mut parts = Parts::new();
        let report = parts.recover(&snap_dir, &wal_dir);
        // Sequencer resumes from the larger of the two
        assert_eq!(report.last_seq, 9);
        assert_eq!(parts.book.bid_level_count(), 0);
    }

    #[test]
    fn test_cancel_records_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let wal_dir = tmp.path().join("wal");
        {
            let mut wal = EntryWal::open(WalConfig::new(&wal_dir)).unwrap();
            append_place(&mut wal, 1, Side::Bid, 100, 5);
            wal.append(&WalRecord::new(RecordType::Cancel, 2, 0, vec![]))
                .unwrap();
            wal.sync().unwrap();
        }

        let mut parts = Parts::new();
        let report = parts.recover(&tmp.path().join("snapshots"), &wal_dir);
        assert_eq!(report.replayed_records, 1);
        assert_eq!(report.last_seq, 2);
        assert_eq!(parts.book.best_bid(), Some((100, 5)));
    }

    #[test]
    fn test_malformed_payload_aborts() {
        let tmp = TempDir::new().unwrap();
        let wal_dir = tmp.path().join("wal");
        {
            let mut wal = EntryWal::open(WalConfig::new(&wal_dir)).unwrap();
            wal.append(&WalRecord::new(RecordType::Place, 1, 0, vec![1, 2, 3]))
                .unwrap();
            wal.sync().unwrap();
        }

        let mut parts = Parts::new();
        let err = recover(
            &mut parts.book,
            &mut parts.arena,
            &parts.ring,
            &parts.epochs,
            &parts.sequencer,
            &tmp.path().join("snapshots"),
            &wal_dir,
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Wal(WalError::Apply(_))));
    }
}
