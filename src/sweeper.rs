use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that completes confirmed bookings once check-out has passed.
pub async fn run_completer(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.complete_due().await {
            Ok(0) => {}
            Ok(n) => info!(completed = n, "completion sweep"),
            Err(e) => warn!(error = %e, "completion sweep aborted"),
        }
    }
}

/// Background task that compacts the WAL once enough events have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appended = engine.wal_appends_since_compact().await;
        if appended < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            warn!(appended, error = %e, "WAL compaction failed");
        }
    }
}
