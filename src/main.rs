use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use stayline::clock::SystemClock;
use stayline::config::Config;
use stayline::engine::Engine;
use stayline::listing::InMemoryListings;
use stayline::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    stayline::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let listings = match &config.listings_file {
        Some(path) => InMemoryListings::from_json_file(path)?,
        None => {
            tracing::warn!("STAYLINE_LISTINGS not set, no listing is bookable");
            InMemoryListings::new()
        }
    };
    let listing_count = listings.len();

    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(listings),
        Arc::new(SystemClock),
        config.restore_policy,
    )?);

    info!("stayline started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  listings: {listing_count}");
    info!("  restore_policy: {:?}", config.restore_policy);
    info!("  sweep_interval: {}s", config.sweep_interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let completer = tokio::spawn(sweeper::run_completer(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.sweep_interval,
    ));

    // Graceful shutdown: stop the background tasks on SIGTERM/ctrl-c, then compact once.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    info!("shutdown signal received");

    completer.abort();
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!(error = %e, "final WAL compaction failed");
    }

    info!("stayline stopped");
    Ok(())
}
