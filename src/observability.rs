use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: pending bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "stayline_bookings_created_total";

/// Counter: confirm attempts that reached availability. Labels: outcome
/// (`confirmed`, `not_available`, `conflict`).
pub const CONFIRMS_TOTAL: &str = "stayline_confirms_total";

/// Counter: cancellations. Labels: actor.
pub const CANCELLATIONS_TOTAL: &str = "stayline_cancellations_total";

/// Counter: bookings moved to completed.
pub const COMPLETIONS_TOTAL: &str = "stayline_completions_total";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: listing calendars held in memory.
pub const LISTINGS_LOADED: &str = "stayline_listings_loaded";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayline_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "stayline_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
