//! Logging and tracing setup
//!
//! Provides structured logging configuration using tracing.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Resolve the log filter: `RUST_LOG` wins, then the `LOG_LEVEL`
/// configuration variable, then `info`.
fn env_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Initialize tracing/logging for the application
///
/// Usage:
/// ```rust,ignore
/// // In main.rs
/// pagerelay_common::init_tracing();
///
/// // Then in your code:
/// tracing::info!("Server starting on port 3000");
/// tracing::error!(error = %e, "Database connection failed");
/// ```
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true) // Show module path
                .with_level(true) // Show log level
                .compact(),
        )
        .init();
}

/// Initialize tracing with JSON output (for production)
///
/// Outputs logs in JSON format, better for log aggregation systems
/// like Grafana Loki, ELK stack, etc.
pub fn init_tracing_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_current_span(true),
        )
        .init();
}
