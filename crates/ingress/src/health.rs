/*!
 * Health Probes
 *
 * Both probes do a trivial store round-trip; readiness additionally
 * reports a named check map plus pool utilization so a saturated pool is
 * visible before it turns into 503s on the webhook path.
 */

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use pagerelay_common::db;

use crate::AppState;

/// Liveness probe - can we reach the store?
pub async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match db::health_check(&state.pool).await {
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
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database_ok = db::health_check(&state.pool).await.is_ok();
    let (connections, idle) = db::pool_stats(&state.pool);

    let checks = json!({
        "database": database_ok,
    });
    let pool = json!({
        "connections": connections,
        "idle": idle,
    });

    if database_ok {
        (
            StatusCode::OK,
            Json(json!({"status": "ready", "checks": checks, "pool": pool})),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready", "checks": checks, "pool": pool})),
        )
    }
}
