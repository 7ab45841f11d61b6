/*!
 * Webhook Ingress Service
 *
 * Receives signed page webhooks from Meta, verifies them, and durably
 * enqueues one processing job per new post. Never calls the Graph API or
 * Discord itself; that is the worker's job.
 *
 * ```text
 * Meta ──POST /meta/webhook──> verify HMAC over raw bytes
 *                                │
 *                                ├─> posts row (get_or_create, idempotent)
 *                                └─> relay_jobs row (singleton key = fb_post_id)
 * ```
 */

use std::sync::Arc;

use axum::{Router, routing::get};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use pagerelay_common::{PgQueue, PostStore};

pub mod config;
pub mod handlers;
pub mod health;
pub mod metrics;

pub use config::IngressConfig;

/// Shared state for all ingress handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub store: PostStore,
    pub queue: PgQueue,
    pub config: Arc<IngressConfig>,
}

impl AppState {
    pub fn new(pool: PgPool, queue: PgQueue, config: IngressConfig) -> Self {
        Self {
            store: PostStore::new(pool.clone()),
            pool,
            queue,
            config: Arc::new(config),
        }
    }
}

/// Build the ingress router: webhook surface, probes, metrics.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/meta/webhook",
            get(handlers::verify_webhook).post(handlers::receive_event),
        )
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
