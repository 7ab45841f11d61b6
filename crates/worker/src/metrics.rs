/*!
 * Prometheus Metrics for the Delivery Worker
 */

use axum::http::StatusCode;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, IntCounter, IntCounterVec, TextEncoder, opts, register_histogram,
    register_int_counter, register_int_counter_vec,
};

lazy_static! {
    /// Jobs claimed from the queue
    pub static ref JOBS_CONSUMED_TOTAL: IntCounter = register_int_counter!(
        "relay_jobs_consumed_total",
        "Total jobs claimed from the process-post queue"
    )
    .expect("metric can be created");

    /// Dispatch attempts by outcome (success/retryable/ambiguous/fatal)
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_deliveries_total", "Total dispatch attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can be created");

    /// End-to-end dispatch latency
    pub static ref DELIVERY_DURATION: Histogram = register_histogram!(
        "relay_delivery_duration_seconds",
        "Discord dispatch duration in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("metric can be created");

    /// Graph fetch failures by retryability
    pub static ref FETCH_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("relay_fetch_failures_total", "Total Graph fetch failures"),
        &["retryable"]
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
