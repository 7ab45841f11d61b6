/*!
 * Configuration Module for the Webhook Ingress
 */

use anyhow::{Context, Result};
use std::env;

/// Main configuration for the ingress service
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Listen port
    pub port: u16,

    /// Shared secret for the webhook verification handshake
    pub verify_token: String,

    /// HMAC key for `X-Hub-Signature-256` verification
    pub app_secret: String,

    /// Posts older than this (per the webhook's `created_time`) are
    /// skipped at ingress. 0 disables the gate.
    pub max_post_age_minutes: i64,

    /// Retry limit stamped on each enqueued job; the worker fails a job
    /// terminally once its attempts reach this. Read from the same
    /// QUEUE_MAX_ATTEMPTS variable the worker sees.
    pub queue_max_attempts: i32,

    /// PostgreSQL connection URL
    pub database_url: String,

    /// Connection pool size
    pub database_max_connections: u32,
}

impl IngressConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let verify_token = env::var("META_VERIFY_TOKEN").context("META_VERIFY_TOKEN not set")?;
        let app_secret = env::var("META_APP_SECRET").context("META_APP_SECRET not set")?;

        let max_post_age_minutes = env::var("MAX_POST_AGE_MINUTES")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<i64>()
            .context("MAX_POST_AGE_MINUTES must be a valid number")?;

        let queue_max_attempts = env::var("QUEUE_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<i32>()
            .context("QUEUE_MAX_ATTEMPTS must be a valid number")?;

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .context("DATABASE_MAX_CONNECTIONS must be a valid number")?;

        Ok(Self {
            port,
            verify_token,
            app_secret,
            max_post_age_minutes,
            queue_max_attempts,
            database_url,
            database_max_connections,
        })
    }
}
