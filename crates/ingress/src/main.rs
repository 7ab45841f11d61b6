use anyhow::{Context, Result};
use tracing::{error, info};

use pagerelay_common::{PgQueue, PROCESS_POST_QUEUE};
use pagerelay_ingress::{AppState, IngressConfig, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    pagerelay_common::init_tracing();

    info!("🚀 Starting PageRelay Ingress");

    // Load configuration
    let config = IngressConfig::from_env().context("Failed to load configuration")?;

    info!("📋 Configuration loaded:");
    info!("   - Port: {}", config.port);
    info!(
        "   - Database: {}",
        config.database_url.split('@').next_back().unwrap_or("***")
    );
    info!(
        "   - Age gate: {}",
        if config.max_post_age_minutes > 0 {
            format!("{} minutes", config.max_post_age_minutes)
        } else {
            "disabled".to_string()
        }
    );

    // Create PostgreSQL connection pool
    info!("📦 Connecting to PostgreSQL...");
    let pool = pagerelay_common::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to create database pool")?;
    info!("✅ PostgreSQL connected");

    // Apply schema migrations (idempotent)
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("✅ Migrations applied");

    let queue = PgQueue::new(pool.clone(), PROCESS_POST_QUEUE, config.queue_max_attempts);
    let state = AppState::new(pool, queue, config.clone());
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("✅ Ingress is READY");
    info!("   - Webhook: http://{}/meta/webhook", addr);
    info!("   - Health:  http://{}/healthz", addr);
    info!("   - Ready:   http://{}/readyz", addr);
    info!("   - Metrics: http://{}/metrics", addr);
    info!("   - Press Ctrl+C to shutdown gracefully");

    // Serve until SIGINT/SIGTERM; in-flight requests drain before exit.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Ingress server failed")?;

    info!("👋 Ingress stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
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

    info!("🛑 Shutting down Ingress...");
}
