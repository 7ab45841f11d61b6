use anyhow::{Context, Result};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use pagerelay_common::{PgQueue, PostStore, PROCESS_POST_QUEUE};
use pagerelay_worker::{
    Consumer, DiscordClient, GraphClient, PostPipeline, WorkerConfig, health, janitor,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    pagerelay_common::init_tracing();

    info!("🚀 Starting PageRelay Worker");

    // Load configuration
    let config = WorkerConfig::from_env().context("Failed to load configuration")?;

    info!("📋 Configuration loaded:");
    info!(
        "   - Database: {}",
        config.database_url.split('@').next_back().unwrap_or("***")
    );
    info!("   - Page: {}", config.graph.page_id);
    info!("   - Trigger tag: {}", config.trigger_tag);
    info!("   - Batch size: {}", config.batch_size);
    info!("   - Queue retry limit: {}", config.queue_max_attempts);
    info!("   - Channel routes: {}", config.channel_routes.len());
    info!(
        "   - Alerts: {}",
        if config.alerts_enabled { "enabled" } else { "SUPPRESSED" }
    );

    // Create PostgreSQL connection pool
    info!("📦 Connecting to PostgreSQL...");
    let pool = pagerelay_common::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to create database pool")?;
    info!("✅ PostgreSQL connected");

    // Build the external clients
    let graph = GraphClient::new(&config.graph).context("Failed to create Graph client")?;
    let discord = DiscordClient::new(&config).context("Failed to create Discord client")?;

    // Startup probe: refuse to run with an unusable page token. Failing
    // here is loud; failing per-job is an invisible retry loop.
    info!("🔑 Verifying page access...");
    let page_name = graph
        .verify_page_access()
        .await
        .context("Page access check failed - is META_PAGE_ACCESS_TOKEN still valid?")?;
    info!("✅ Page access verified: {}", page_name);

    let store = PostStore::new(pool.clone());
    let queue = PgQueue::new(pool.clone(), PROCESS_POST_QUEUE, config.queue_max_attempts);

    // Start the health server
    let health_port = config.health_port;
    let health_pool = pool.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health_pool).await {
            error!("Health server failed: {}", e);
        }
    });

    // Shutdown fan-out
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Start the janitor
    let janitor_handle = tokio::spawn(janitor::run(
        store.clone(),
        queue.clone(),
        config.queue_archive_days,
        config.post_retention_days,
        shutdown_tx.subscribe(),
    ));

    // Start the consumer
    let pipeline = PostPipeline::new(
        store,
        graph,
        discord,
        config.alerts_enabled,
        config.max_post_age_minutes,
    );
    let consumer = Consumer::new(
        queue,
        pipeline,
        config.batch_size,
        Duration::from_secs(config.poll_interval_secs),
    );

    let consumer_shutdown = shutdown_tx.subscribe();
    let consumer_handle = tokio::spawn(async move {
        consumer.run(consumer_shutdown).await;
    });

    info!("✅ Worker is READY");
    info!("   - Health: http://0.0.0.0:{}/healthz", config.health_port);
    info!("   - Ready:  http://0.0.0.0:{}/readyz", config.health_port);
    info!("   - Metrics: http://0.0.0.0:{}/metrics", config.health_port);
    info!("   - Press Ctrl+C to shutdown gracefully");

    // Wait for a shutdown signal
    shutdown_signal().await;

    info!("🛑 Shutting down Worker...");
    let _ = shutdown_tx.send(());

    // The consumer finishes its current batch; don't wait forever.
    let _ = tokio::time::timeout(Duration::from_secs(60), async {
        let _ = consumer_handle.await;
        let _ = janitor_handle.await;
    })
    .await;

    info!("👋 Worker stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received Ctrl+C signal"),
        _ = terminate => info!("📡 Received SIGTERM"),
    }
}
