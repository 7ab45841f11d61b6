use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::webhook::WebhookAuthor;

/// Payload of a `process-post` queue job.
///
/// Enqueued by the ingress exactly once per new post row, with
/// `fb_post_id` as the singleton key. `webhook_data` carries whatever the
/// webhook change value contained inline, used as a reduced-fidelity
/// fallback when the Graph fetch fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPostJob {
    pub fb_post_id: String,
    /// Per-inbound-request UUID, threaded through all logs for this post.
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_data: Option<WebhookData>,
}

/// Inline post content from the webhook change value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<WebhookAuthor>,
    /// Epoch seconds, as Meta sends them in the change value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}
