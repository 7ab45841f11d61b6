use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::PostStatus;

/// One row per observed upstream post identifier.
///
/// `fb_post_id` is the natural key; duplicate webhook deliveries collapse
/// onto a single row. Content fields stay NULL until the worker has
/// fetched the post from the Graph API.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub fb_post_id: String,
    pub status: PostStatus,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub message: Option<String>,
    pub permalink: Option<String>,
    /// Upstream creation time of the post itself.
    pub created_at: Option<DateTime<Utc>>,
    /// When the first webhook referencing this post arrived.
    pub received_at: DateTime<Utc>,
    pub discord_msg_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
}

/// Append-only audit entry for a post.
///
/// Event names: `webhook_received`, `status_<target>`, `marked_for_retry`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostEvent {
    pub id: i64,
    pub fb_post_id: String,
    pub event: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One row per Discord dispatch attempt, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryLog {
    pub id: i64,
    pub fb_post_id: String,
    pub success: bool,
    pub discord_msg_id: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: i32,
    pub created_at: DateTime<Utc>,
}
