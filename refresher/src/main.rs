//! Ratekeeper Refresher Binary
//!
//! Runs refresh cycles on a fixed interval until interrupted.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratekeeper_fx::build_gateway;
use ratekeeper_refresher::{
    Environment, RateRefresher, RefreshScheduler, RefresherConfig, StoreBackend,
};
use ratekeeper_store::{MemoryRateStore, PgRateStore, RateStore};

/// Ratekeeper rate refresher
#[derive(Parser, Debug)]
#[command(name = "refresher")]
#[command(about = "Refreshes pending exchange rate requests on a timer")]
struct Args {
    /// Run a single refresh cycle and exit
    #[arg(long)]
    once: bool,

    /// Pending requests claimed per cycle (overrides RATES_UPDATE_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds between cycles (overrides RATES_UPDATE_CRON_IN_SECONDS)
    #[arg(long)]
    interval_secs: Option<u64>,
}

fn init_tracing(config: &RefresherConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    match config.environment {
        Environment::Production => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        Environment::Local => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

async fn build_store(config: &RefresherConfig) -> anyhow::Result<Arc<dyn RateStore>> {
    Ok(match config.store_backend {
        StoreBackend::Postgres => {
            let store = PgRateStore::connect(
                &config.database.connection_url(),
                config.database.max_connections,
            )
            .await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        StoreBackend::Memory => Arc::new(MemoryRateStore::new()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = RefresherConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(secs) = args.interval_secs {
        config.refresh_interval_secs = secs;
    }

    init_tracing(&config);

    info!("Starting Ratekeeper refresher");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let store = build_store(&config).await?;
    let gateway = build_gateway(
        config.gateway_kind,
        &config.frankfurter_api_url,
        config.http_timeout,
    )?;

    info!(
        store = ?config.store_backend,
        gateway = gateway.name(),
        batch_size = config.batch_size,
        interval_secs = config.refresh_interval_secs,
        "Refresher wired"
    );

    let refresher = Arc::new(RateRefresher::new(store, gateway));

    if args.once {
        let report = refresher.run_cycle(config.batch_size).await;
        info!(report = ?report, "Single refresh cycle complete");
        return Ok(());
    }

    let mut scheduler = RefreshScheduler::new(
        refresher.clone(),
        config.refresh_interval(),
        config.batch_size,
    );
    if let Some(timeout) = config.stale_processing_timeout {
        scheduler = scheduler.with_stale_recovery(timeout);
    }
    let scheduler = Arc::new(scheduler);

    // Set up graceful shutdown
    let scheduler_clone = scheduler.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        scheduler_clone.shutdown();
    });

    scheduler.run().await;

    let metrics = refresher.metrics().snapshot();
    info!(
        cycles = metrics.cycles_total,
        completed = metrics.records_completed,
        failed = metrics.records_failed,
        "Refresher shutdown complete"
    );
    Ok(())
}
