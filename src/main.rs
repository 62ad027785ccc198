//! Relay delivery service.
//!
//! Wires the delivery engine together: broker, record store, rate limiter
//! factory, worker pool, and the operational HTTP surface, with graceful
//! shutdown on SIGINT/SIGTERM.

mod config;
mod ops;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use config::Config;
use relay_core::{Clock, RealClock};
use relay_engine::{
    DeliveryEngine, DeliveryStore, InMemoryBroker, InMemoryDeliveryStore, PostgresDeliveryStore,
    QueueAdmin,
};
use relay_ratelimit::{DistributedRateLimiter, RateLimiterFactory, SharedRateLimit};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting relay delivery service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        redis = config.redis_url.is_some(),
        worker_pool_size = config.worker_pool_size,
        "configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let store = build_store(&config).await?;
    let broker = Arc::new(InMemoryBroker::new(clock.clone()));

    let limiters =
        RateLimiterFactory::new(build_shared_limiter(&config, &clock).await?, clock.clone());

    let mut engine =
        DeliveryEngine::new(broker.clone(), store, config.to_delivery_config(), clock)?;
    engine.start().await?;

    let admin = Arc::new(QueueAdmin::new(broker));
    let ops_handle = tokio::spawn(ops::serve(
        config.parse_ops_addr()?,
        admin.clone(),
        Arc::new(limiters.api()),
    ));

    info!("relay is ready to dispatch deliveries");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    engine.shutdown().await?;
    admin.close().await?;
    ops_handle.abort();

    info!("relay shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based filtering.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,relay=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Builds the delivery record store from configuration.
///
/// `DATABASE_URL` selects PostgreSQL; without it records live in memory,
/// which is fine for embedded use and local development.
async fn build_store(config: &Config) -> Result<Arc<dyn DeliveryStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .context("failed to connect to the record store database")?;
            PostgresDeliveryStore::ensure_schema(&pool)
                .await
                .context("failed to prepare the delivery schema")?;
            info!("record store: postgresql");
            Ok(Arc::new(PostgresDeliveryStore::new(pool)))
        },
        None => {
            info!("record store: in-memory");
            Ok(Arc::new(InMemoryDeliveryStore::new()))
        },
    }
}

/// Builds the shared rate limit store when one is configured.
async fn build_shared_limiter(
    config: &Config,
    clock: &Arc<dyn Clock>,
) -> Result<Option<Arc<dyn SharedRateLimit>>> {
    match &config.redis_url {
        Some(url) => {
            let limiter = DistributedRateLimiter::connect(url, clock.clone())
                .await
                .context("failed to connect to the rate limit store")?;
            info!("rate limiting: distributed with in-process fallback");
            Ok(Some(Arc::new(limiter)))
        },
        None => {
            info!("rate limiting: in-process only");
            Ok(None)
        },
    }
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
