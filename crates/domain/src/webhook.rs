//! Wire types for Meta page webhook deliveries.
//!
//! Deliberately tolerant: every field the relay does not act on is
//! optional, and unknown fields are ignored, because Meta retries
//! aggressively on anything that looks like a rejection.

use serde::{Deserialize, Serialize};

/// Top-level webhook body: `{"object": "page", "entry": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// One page entry; `changes` carries the feed events.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    pub value: ChangeValue,
}

/// The feed change value. Only `verb == "add"` with a `post_id` is acted
/// on; the rest is carried along as fallback content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub verb: Option<String>,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from: Option<WebhookAuthor>,
    /// Epoch seconds.
    #[serde(default)]
    pub created_time: Option<i64>,
    #[serde(default)]
    pub published: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAuthor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}
