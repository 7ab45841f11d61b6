/*!
 * Discord Dispatch Client
 *
 * Formats an eligible post into a Discord webhook payload and sends it,
 * classifying every outcome for the pipeline:
 *
 * | Discord response            | Outcome    |
 * |-----------------------------|------------|
 * | 2xx                         | success    |
 * | 429                         | retryable (carries Retry-After) |
 * | 5xx                         | retryable  |
 * | other 4xx                   | fatal      |
 * | our 30 s abort              | ambiguous  |
 * | other transport error       | retryable  |
 *
 * An ambiguous outcome means the bytes may already be on Discord's side;
 * the pipeline parks the post in `needs_review` instead of retrying.
 */

use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::WorkerConfig;
use crate::graph::FetchedPost;

/// Hard dispatch deadline; crossing it yields the ambiguous outcome.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Discord content ceiling we format against.
const MAX_CONTENT_CHARS: usize = 4000;

const TRUNCATION_MARKER: &str = "...";

/// Backoff hint when a 429 carries no usable Retry-After.
const DEFAULT_RETRY_AFTER_MS: u64 = 5000;

const EMBED_COLOR: u32 = 0x1877F2;

/// Successful dispatch. `message_id` is present when the webhook was
/// called with `wait=true`.
#[derive(Debug, Clone)]
pub struct DispatchSuccess {
    pub message_id: Option<String>,
}

/// Failed dispatch, classified for the pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{message}")]
    Retryable {
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// The request was aborted with the response outstanding; the message
    /// may or may not have been delivered.
    #[error("{0}")]
    Ambiguous(String),

    #[error("{0}")]
    Fatal(String),
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
}

/// Client for the Discord webhook sink.
pub struct DiscordClient {
    http: Client,
    default_url: String,
    wait: bool,
    disclaimer: String,
    mention_role_id: Option<String>,
    trigger_tag: String,
    /// `(lowercased tag, url)` scanned in priority order; first match wins.
    routes: Vec<(String, String)>,
    timeout: Duration,
}

impl DiscordClient {
    pub fn new(config: &WorkerConfig) -> anyhow::Result<Self> {
        // No client-level timeout: the dispatch deadline is enforced per
        // request so the abort can be classified as ambiguous.
        let http = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            http,
            default_url: config.discord_webhook_url.clone(),
            wait: config.discord_wait,
            disclaimer: config.discord_disclaimer.clone(),
            mention_role_id: config.discord_mention_role_id.clone(),
            trigger_tag: config.trigger_tag.clone(),
            routes: build_routes(&config.channel_routes, &config.channel_priority),
            timeout: DISPATCH_TIMEOUT,
        })
    }

    /// Override the dispatch deadline (tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the message carries the configured trigger tag.
    pub fn has_trigger(&self, message: &str) -> bool {
        has_tag(message, &self.trigger_tag)
    }

    /// Sanitize a post body for Discord.
    pub fn sanitize_message(&self, message: &str) -> String {
        sanitize(message, &self.trigger_tag)
    }

    /// Pick the webhook URL for a message: highest-priority routable tag
    /// found in the lowercased message, else the default sink.
    pub fn route_for(&self, message: &str) -> &str {
        let lowered = message.to_lowercase();
        for (tag, url) in &self.routes {
            if lowered.contains(tag.as_str()) {
                debug!(tag, "Routing post by channel tag");
                return url;
            }
        }
        &self.default_url
    }

    /// Send a post to its routed webhook.
    pub async fn send_post(&self, post: &FetchedPost) -> Result<DispatchSuccess, DispatchError> {
        let message = post.message.as_deref().unwrap_or_default();
        let url = self.dispatch_url(self.route_for(message));
        let payload = self.build_payload(post);

        let request = self.http.post(&url).json(&payload);

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_elapsed) => {
                return Err(DispatchError::Ambiguous(format!(
                    "dispatch aborted after {}s; the message may have been delivered",
                    self.timeout.as_secs()
                )));
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(DispatchError::Ambiguous(format!(
                    "dispatch timed out; the message may have been delivered: {e}"
                )));
            }
            Ok(Err(e)) => {
                return Err(DispatchError::Retryable {
                    message: format!("Discord transport error: {e}"),
                    retry_after_ms: None,
                });
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();

        if status.is_success() {
            let message_id = if self.wait {
                response
                    .json::<DiscordMessage>()
                    .await
                    .ok()
                    .map(|message| message.id)
            } else {
                None
            };
            return Ok(DispatchSuccess { message_id });
        }

        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<f64>().ok())
                .map(|seconds| (seconds * 1000.0) as u64)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS);

            return Err(DispatchError::Retryable {
                message: format!("Discord rate limited (retry after {retry_after_ms} ms)"),
                retry_after_ms: Some(retry_after_ms),
            });
        }

        if status.is_server_error() {
            return Err(DispatchError::Retryable {
                message: format!("Discord server error: HTTP {status}"),
                retry_after_ms: None,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Fatal(format!(
            "Discord rejected the message: HTTP {status}: {}",
            body.chars().take(500).collect::<String>()
        )))
    }

    fn dispatch_url(&self, base: &str) -> String {
        if !self.wait {
            base.to_string()
        } else if base.contains('?') {
            format!("{base}&wait=true")
        } else {
            format!("{base}?wait=true")
        }
    }

    /// Assemble the webhook payload: content (sanitized body, disclaimer,
    /// role mention) plus a single embed. `allowed_mentions` pins pings to
    /// the configured role only; `parse` stays empty so post text can
    /// never expand `@everyone`.
    pub fn build_payload(&self, post: &FetchedPost) -> serde_json::Value {
        let sanitized = self.sanitize_message(post.message.as_deref().unwrap_or_default());

        let mut content = sanitized;
        if !self.disclaimer.is_empty() {
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(&self.disclaimer);
        }
        if let Some(role) = &self.mention_role_id {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("<@&{role}>"));
        }

        let mut embed = serde_json::json!({
            "title": post.author_name.as_deref().unwrap_or("New page post"),
            "color": EMBED_COLOR,
            "footer": {"text": "Relayed from Facebook"},
        });
        if let Some(permalink) = &post.permalink {
            embed["url"] = serde_json::json!(permalink);
        }
        if let Some(created_time) = &post.created_time {
            embed["timestamp"] = serde_json::json!(created_time.to_rfc3339());
        }
        if let Some(image_url) = &post.image_url {
            embed["image"] = serde_json::json!({"url": image_url});
        }

        let allowed_roles: Vec<&String> = self.mention_role_id.iter().collect();

        serde_json::json!({
            "content": content,
            "embeds": [embed],
            "allowed_mentions": {
                "parse": [],
                "roles": allowed_roles,
            },
        })
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Case-insensitive tag search with a right-side non-word boundary, so
/// `#discord-like` does not satisfy a search for `#discord`.
pub fn has_tag(message: &str, tag: &str) -> bool {
    if tag.is_empty() {
        return false;
    }

    let msg: Vec<char> = message.chars().collect();
    let tag_chars: Vec<char> = tag.chars().collect();
    let n = tag_chars.len();
    if msg.len() < n {
        return false;
    }

    for start in 0..=(msg.len() - n) {
        let matched = msg[start..start + n]
            .iter()
            .zip(&tag_chars)
            .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if matched {
            let boundary = msg.get(start + n).is_none_or(|c| !is_tag_char(*c));
            if boundary {
                return true;
            }
        }
    }

    false
}

/// Strip the trigger tag and every remaining `#word` token, collapse
/// whitespace, trim, and cap the length. Idempotent.
pub fn sanitize(message: &str, trigger_tag: &str) -> String {
    let without_trigger = remove_tag(message, trigger_tag);
    let without_hashtags = strip_hashtags(&without_trigger);

    let collapsed = without_hashtags
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    truncate_content(&collapsed)
}

/// Remove boundary-respecting occurrences of the trigger tag.
fn remove_tag(message: &str, tag: &str) -> String {
    if tag.is_empty() {
        return message.to_string();
    }

    let msg: Vec<char> = message.chars().collect();
    let tag_chars: Vec<char> = tag.chars().collect();
    let n = tag_chars.len();

    let mut out = String::with_capacity(message.len());
    let mut i = 0;
    while i < msg.len() {
        let matched = i + n <= msg.len()
            && msg[i..i + n]
                .iter()
                .zip(&tag_chars)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
            && msg.get(i + n).is_none_or(|c| !is_tag_char(*c));

        if matched {
            i += n;
        } else {
            out.push(msg[i]);
            i += 1;
        }
    }

    out
}

/// Drop every `#word` token (the `#` and its run of tag characters).
fn strip_hashtags(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '#' && chars.peek().is_some_and(|next| is_tag_char(*next)) {
            while chars.peek().is_some_and(|next| is_tag_char(*next)) {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }

    out
}

/// Cap at the content ceiling, ending with `...` exactly when truncated.
fn truncate_content(content: &str) -> String {
    if content.chars().count() <= MAX_CONTENT_CHARS {
        return content.to_string();
    }

    let keep = MAX_CONTENT_CHARS - TRUNCATION_MARKER.len();
    let mut out: String = content.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Flatten the routing map into a priority-ordered scan list:
/// prioritized tags first, then the remaining routable tags in
/// lexicographic order for determinism.
fn build_routes(
    routes: &BTreeMap<String, String>,
    priority: &[String],
) -> Vec<(String, String)> {
    let lowered: BTreeMap<String, String> = routes
        .iter()
        .map(|(tag, url)| (tag.to_lowercase(), url.clone()))
        .collect();

    let mut ordered = Vec::with_capacity(lowered.len());

    for tag in priority {
        if let Some(url) = lowered.get(tag) {
            if !ordered.iter().any(|(existing, _)| existing == tag) {
                ordered.push((tag.clone(), url.clone()));
            }
        }
    }

    for (tag, url) in &lowered {
        if !ordered.iter().any(|(existing, _)| existing == tag) {
            ordered.push((tag.clone(), url.clone()));
        }
    }

    ordered
}
