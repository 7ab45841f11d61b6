/*!
 * Configuration Module for the Delivery Worker
 */

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;

/// Graph API connection settings, shared by the worker and the
/// `subscribe` administrative binary.
#[derive(Debug, Clone)]
pub struct GraphSettings {
    /// Base URL of the Graph API (overridable for tests and stubs)
    pub base_url: String,

    /// API version path segment, e.g. `v21.0`
    pub version: String,

    /// The page whose posts are relayed; fetched posts from any other
    /// author are rejected
    pub page_id: String,

    /// Page access token
    pub access_token: String,

    /// App secret, used for the `appsecret_proof` parameter
    pub app_secret: String,
}

impl GraphSettings {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let base_url = env::var("META_GRAPH_BASE_URL")
            .unwrap_or_else(|_| "https://graph.facebook.com".to_string());
        let version = env::var("META_GRAPH_VERSION").unwrap_or_else(|_| "v21.0".to_string());
        let page_id = env::var("META_PAGE_ID").context("META_PAGE_ID not set")?;
        let access_token =
            env::var("META_PAGE_ACCESS_TOKEN").context("META_PAGE_ACCESS_TOKEN not set")?;
        let app_secret = env::var("META_APP_SECRET").context("META_APP_SECRET not set")?;

        Ok(Self {
            base_url,
            version,
            page_id,
            access_token,
            app_secret,
        })
    }
}

/// Main configuration for the worker service
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Connection pool size
    pub database_max_connections: u32,

    /// Graph API settings
    pub graph: GraphSettings,

    /// Default Discord webhook URL
    pub discord_webhook_url: String,

    /// Request a message id back from Discord (`?wait=true`)
    pub discord_wait: bool,

    /// Disclaimer line appended to every message (empty disables)
    pub discord_disclaimer: String,

    /// Role to mention; also the only role allowed to be pinged
    pub discord_mention_role_id: Option<String>,

    /// Global kill switch: when false, claimed jobs complete without
    /// touching the post
    pub alerts_enabled: bool,

    /// Hashtag whose presence makes a post eligible
    pub trigger_tag: String,

    /// Age horizon in minutes; 0 disables the gate
    pub max_post_age_minutes: i64,

    /// Hashtag -> webhook URL routing map
    pub channel_routes: BTreeMap<String, String>,

    /// Ordered tag priority for routing; first match wins
    pub channel_priority: Vec<String>,

    /// Jobs claimed per dequeue
    pub batch_size: i64,

    /// Sleep between empty polls (seconds)
    pub poll_interval_secs: u64,

    /// Queue retry limit before a job fails terminally. Stamped onto
    /// jobs at enqueue, so the ingress reads the same variable.
    pub queue_max_attempts: i32,

    /// Age at which terminal jobs are deleted (days)
    pub queue_archive_days: i32,

    /// Age at which terminal posts are pruned (days)
    pub post_retention_days: i32,

    /// Health/metrics server port
    pub health_port: u16,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let graph = GraphSettings::from_env()?;

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .context("DATABASE_MAX_CONNECTIONS must be a valid number")?;

        let discord_webhook_url =
            env::var("DISCORD_WEBHOOK_URL").context("DISCORD_WEBHOOK_URL not set")?;
        let discord_wait = env::var("DISCORD_WEBHOOK_WAIT")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .context("DISCORD_WEBHOOK_WAIT must be true or false")?;
        let discord_disclaimer = env::var("DISCORD_DISCLAIMER").unwrap_or_default();
        let discord_mention_role_id = env::var("DISCORD_MENTION_ROLE_ID")
            .ok()
            .filter(|role| !role.is_empty());

        let alerts_enabled = env::var("ALERTS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .context("ALERTS_ENABLED must be true or false")?;

        let trigger_tag = env::var("TRIGGER_TAG").unwrap_or_else(|_| "#discord".to_string());

        let max_post_age_minutes = env::var("MAX_POST_AGE_MINUTES")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<i64>()
            .context("MAX_POST_AGE_MINUTES must be a valid number")?;

        let channel_routes = match env::var("CHANNEL_ROUTES") {
            Ok(raw) if !raw.is_empty() => {
                serde_json::from_str::<BTreeMap<String, String>>(&raw)
                    .context("CHANNEL_ROUTES must be a JSON object of tag -> webhook URL")?
            }
            _ => BTreeMap::new(),
        };

        let channel_priority = env::var("CHANNEL_PRIORITY")
            .unwrap_or_default()
            .split(',')
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();

        let batch_size = env::var("WORKER_BATCH_SIZE")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<i64>()
            .context("WORKER_BATCH_SIZE must be a valid number")?;

        let poll_interval_secs = env::var("WORKER_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<u64>()
            .context("WORKER_POLL_INTERVAL_SECS must be a valid number")?;

        let queue_max_attempts = env::var("QUEUE_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<i32>()
            .context("QUEUE_MAX_ATTEMPTS must be a valid number")?;

        let queue_archive_days = env::var("QUEUE_ARCHIVE_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse::<i32>()
            .context("QUEUE_ARCHIVE_DAYS must be a valid number")?;

        let post_retention_days = env::var("POST_RETENTION_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<i32>()
            .context("POST_RETENTION_DAYS must be a valid number")?;

        let health_port = env::var("WORKER_HEALTH_PORT")
            .unwrap_or_else(|_| "8081".to_string())
            .parse::<u16>()
            .context("WORKER_HEALTH_PORT must be a valid port number")?;

        Ok(Self {
            database_url,
            database_max_connections,
            graph,
            discord_webhook_url,
            discord_wait,
            discord_disclaimer,
            discord_mention_role_id,
            alerts_enabled,
            trigger_tag,
            max_post_age_minutes,
            channel_routes,
            channel_priority,
            batch_size,
            poll_interval_secs,
            queue_max_attempts,
            queue_archive_days,
            post_retention_days,
            health_port,
        })
    }
}
