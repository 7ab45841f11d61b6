/*!
 * Prometheus Metrics for the Webhook Ingress
 */

use axum::http::StatusCode;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, TextEncoder, register_int_counter};

lazy_static! {
    /// Webhook deliveries received (any outcome)
    pub static ref WEBHOOKS_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        "relay_webhooks_received_total",
        "Total webhook deliveries received"
    )
    .expect("metric can be created");

    /// Deliveries rejected for a bad or missing signature
    pub static ref SIGNATURE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "relay_webhook_signature_failures_total",
        "Total webhook deliveries rejected for an invalid signature"
    )
    .expect("metric can be created");

    /// New posts enqueued for processing
    pub static ref POSTS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        "relay_posts_enqueued_total",
        "Total posts enqueued for processing"
    )
    .expect("metric can be created");

    /// Duplicate webhooks collapsed onto an existing row/job
    pub static ref POSTS_DUPLICATE_TOTAL: IntCounter = register_int_counter!(
        "relay_posts_duplicate_total",
        "Total duplicate webhook deliveries collapsed"
    )
    .expect("metric can be created");
}

/// Render metrics in Prometheus text format
pub async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
