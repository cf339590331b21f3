//! Relay entry point.

use std::sync::Arc;

use bus::EventBus;
use projections::{OrderSummaryView, Projection, ProjectionHandler, StockLevelsView};
use relay::{OutboxRelay, OutboxSweeper, RelayConfig};
use store::PostgresStorage;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .expect("failed to install Prometheus recorder");

    // 3. Load configuration and connect
    let config = RelayConfig::from_env().expect("DATABASE_URL must be set");
    let storage = Arc::new(
        PostgresStorage::connect(&config.database_url, config.max_connections)
            .await
            .expect("failed to connect to database"),
    );
    storage.run_migrations().await.expect("migrations failed");

    // 4. Wire projections onto the bus
    let bus = Arc::new(EventBus::new());

    let order_summaries = Arc::new(OrderSummaryView::new());
    bus.subscribe_many(
        order_summaries.event_types(),
        Arc::new(ProjectionHandler::new(Arc::clone(&order_summaries))),
    )
    .await;

    let stock_levels = Arc::new(StockLevelsView::new());
    bus.subscribe_many(
        stock_levels.event_types(),
        Arc::new(ProjectionHandler::new(Arc::clone(&stock_levels))),
    )
    .await;

    // 5. Start the relay and the sweeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = OutboxRelay::new(Arc::clone(&storage), bus, config.batch_size);
    let poll_interval = config.poll_interval;
    let relay_rx = shutdown_rx.clone();
    let relay_task = tokio::spawn(async move {
        relay.run(poll_interval, relay_rx).await;
    });

    let sweeper = OutboxSweeper::new(
        Arc::clone(&storage),
        config.max_retries,
        config.claim_timeout,
        config.retention,
    );
    let sweep_interval = config.sweep_interval;
    let sweeper_task = tokio::spawn(async move {
        sweeper.run(sweep_interval, shutdown_rx).await;
    });

    tracing::info!(
        batch_size = config.batch_size,
        max_retries = config.max_retries,
        "relay started"
    );

    // 6. Run until signalled
    shutdown_signal().await;
    shutdown_tx.send(true).ok();
    relay_task.await.expect("relay task panicked");
    sweeper_task.await.expect("sweeper task panicked");

    tracing::info!("relay shut down gracefully");
}
