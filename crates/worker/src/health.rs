/*!
 * Worker Health Server
 *
 * Kubernetes-style probes plus the Prometheus endpoint, served on a
 * dedicated port so orchestration can watch the worker independently of
 * the ingress.
 */

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::info;

use crate::metrics;

/// Start the health server; runs until the process exits.
pub async fn serve(port: u16, pool: PgPool) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(pool);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))?;

    info!("🏥 Health server listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Health server failed")?;

    Ok(())
}

/// Liveness probe - can we reach the store?
async fn healthz(State(pool): State<PgPool>) -> (StatusCode, Json<Value>) {
    match pagerelay_common::db::health_check(&pool).await {
        Ok(latency_ms) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "latency_ms": latency_ms,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "error": e.to_string(),
            })),
        ),
    }
}

/// Readiness probe - named dependency checks.
async fn readyz(State(pool): State<PgPool>) -> (StatusCode, Json<Value>) {
    let database_ok = pagerelay_common::db::health_check(&pool).await.is_ok();
    let (connections, idle) = pagerelay_common::db::pool_stats(&pool);

    let checks = json!({
        "database": database_ok,
    });
    let pool_info = json!({
        "connections": connections,
        "idle": idle,
    });

    if database_ok {
        (
            StatusCode::OK,
            Json(json!({"status": "ready", "checks": checks, "pool": pool_info})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready", "checks": checks, "pool": pool_info})),
        )
    }
}
