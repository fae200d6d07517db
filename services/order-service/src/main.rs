//! Engine entrypoint: recover, start background jobs, run a short
//! sample flow, shut down cleanly.
//!
//! Exits non-zero when the WAL cannot be opened or replay fails;
//! corruption is an operator problem and must not be masked.

use order_service::publisher::LogSink;
use order_service::{OrderService, PeriodicJob, Publisher, ServiceConfig, Shutdown};
use std::sync::Arc;
use std::time::Duration;
use types::{OrderType, Side};

fn main() {
    tracing_subscriber::fmt::init();

    let data_dir = std::env::var("LOKIS_DATA_DIR").unwrap_or_else(|_| ".".to_string());
    let config = ServiceConfig::new(&data_dir);
    tracing::info!(data_dir = %data_dir, "starting lokis engine");

    let mut service = match OrderService::open(config) {
        Ok(service) => service,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            std::process::exit(1);
        }
    };
    let report = service.recovery_report();
    tracing::info!(
        snapshot_seq = report.snapshot_seq,
        replayed = report.replayed_records,
        last_seq = report.last_seq,
        "engine recovered"
    );

    let shutdown = Shutdown::new();
    let publisher = Publisher::new(service.outbox().clone(), Arc::new(LogSink));
    let publisher_handle = publisher.spawn(Duration::from_millis(500), shutdown.clone());

    let mut snapshot_job = PeriodicJob::new(Duration::from_secs(5));
    let mut reclaim_job = PeriodicJob::new(Duration::from_secs(1));

    // Sample flow standing in for the transport collaborator.
    let samples = [
        (Side::Bid, OrderType::Limit, 100, 5),
        (Side::Ask, OrderType::Limit, 105, 3),
        (Side::Bid, OrderType::Market, 0, 2),
    ];
    for (side, order_type, price, qty) in samples {
        match service.place_order(side, order_type, price, qty, 1) {
            Ok(seq) => tracing::info!(seq, ?side, ?order_type, price, qty, "order placed"),
            Err(err) => {
                tracing::error!(error = %err, "placement failed");
                std::process::exit(1);
            }
        }
    }

    // Let the jobs run a few cycles before shutting down.
    let run_until = std::time::Instant::now() + Duration::from_secs(12);
    while std::time::Instant::now() < run_until {
        if reclaim_job.due() {
            let reclaimed = service.advance_epoch();
            if reclaimed > 0 {
                tracing::debug!(reclaimed, "epoch advanced");
            }
        }
        if snapshot_job.due() {
            match service.write_snapshot(order_service::service::unix_now_ns()) {
                Ok(seq) => tracing::info!(seq, "snapshot cycle complete"),
                Err(err) => tracing::warn!(error = %err, "snapshot cycle failed"),
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    shutdown.trigger();
    if publisher_handle.join().is_err() {
        tracing::warn!("publisher thread panicked");
    }
    tracing::info!(
        last_seq = service.current_seq(),
        resting = service.snapshot().len(),
        "engine stopped"
    );
}
