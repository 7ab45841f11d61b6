/*!
 * Graph API Client
 *
 * Fetches full post content from the upstream Graph API and classifies
 * every failure as retryable or not. Each call carries the access token
 * plus the `appsecret_proof` (HMAC of the token under the app secret), so
 * a leaked token alone is useless against the API.
 */

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use pagerelay_common::app_secret_proof;

use crate::config::GraphSettings;

/// Field projection requested for every post fetch.
const POST_FIELDS: &str =
    "id,message,permalink_url,created_time,from{id,name},attachments{media_type,media,url}";

/// Graph error codes that signal a transient condition (unknown error,
/// service temporarily unavailable, rate limits).
const RETRYABLE_GRAPH_CODES: [i64; 4] = [1, 2, 4, 17];

/// User-facing latency path: keep the fetch short.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Graph's timestamp format: `2024-01-15T10:30:00+0000`.
const GRAPH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// A fetch failure with its retry classification.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    pub retryable: bool,
}

impl FetchError {
    fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Post content as the pipeline consumes it, whether fetched from the
/// Graph API or synthesized from inline webhook data.
#[derive(Debug, Clone)]
pub struct FetchedPost {
    pub id: String,
    pub message: Option<String>,
    pub permalink: Option<String>,
    pub created_time: Option<DateTime<Utc>>,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphPost {
    id: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    permalink_url: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    from: Option<GraphAuthor>,
    #[serde(default)]
    attachments: Option<GraphAttachments>,
}

#[derive(Debug, Deserialize)]
struct GraphAuthor {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphAttachments {
    #[serde(default)]
    data: Vec<GraphAttachment>,
}

#[derive(Debug, Deserialize)]
struct GraphAttachment {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    media: Option<GraphMedia>,
}

#[derive(Debug, Deserialize)]
struct GraphMedia {
    #[serde(default)]
    image: Option<GraphImage>,
}

#[derive(Debug, Deserialize)]
struct GraphImage {
    #[serde(default)]
    src: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GraphPage {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscribeResponse {
    #[serde(default)]
    success: bool,
}

/// Client for the upstream Graph API.
pub struct GraphClient {
    http: Client,
    base_url: String,
    version: String,
    page_id: String,
    access_token: String,
    proof: String,
}

impl GraphClient {
    pub fn new(settings: &GraphSettings) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            version: settings.version.clone(),
            page_id: settings.page_id.clone(),
            access_token: settings.access_token.clone(),
            proof: app_secret_proof(&settings.access_token, &settings.app_secret),
        })
    }

    fn object_url(&self, object_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.version, object_id)
    }

    /// Fetch a post's full content.
    ///
    /// A post whose author is not the configured page is a non-retryable
    /// failure: content behind a compromised token must never be relayed.
    pub async fn fetch_post(&self, post_id: &str) -> Result<FetchedPost, FetchError> {
        debug!(post_id, "Fetching post from Graph API");

        let response = self
            .http
            .get(self.object_url(post_id))
            .query(&[
                ("fields", POST_FIELDS),
                ("access_token", self.access_token.as_str()),
                ("appsecret_proof", self.proof.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::retryable(format!("Graph transport error: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let post: GraphPost = response
            .json()
            .await
            .map_err(|e| FetchError::retryable(format!("Graph response failed to parse: {e}")))?;

        let author_id = post.from.as_ref().map(|from| from.id.as_str());
        if author_id != Some(self.page_id.as_str()) {
            return Err(FetchError::fatal(format!(
                "post not from configured page (author {})",
                author_id.unwrap_or("<unknown>")
            )));
        }

        Ok(FetchedPost {
            id: post.id,
            message: post.message,
            permalink: post.permalink_url,
            created_time: post.created_time.as_deref().and_then(parse_graph_time),
            author_id: post.from.as_ref().map(|from| from.id.clone()),
            author_name: post.from.and_then(|from| from.name),
            image_url: first_image_url(post.attachments),
        })
    }

    /// Startup probe: confirm the token can read the configured page.
    /// Returns the page name for the startup log.
    pub async fn verify_page_access(&self) -> anyhow::Result<String> {
        let response = self
            .http
            .get(self.object_url(&self.page_id))
            .query(&[
                ("fields", "id,name"),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Graph transport error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("page access check failed: HTTP {status}: {body}");
        }

        let page: GraphPage = response.json().await?;
        if page.id != self.page_id {
            anyhow::bail!(
                "page access check returned unexpected page id {} (expected {})",
                page.id,
                self.page_id
            );
        }

        Ok(page.name.unwrap_or_else(|| page.id.clone()))
    }

    /// Attach this app to the page's `feed` field.
    pub async fn subscribe_app(&self) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/subscribed_apps", self.object_url(&self.page_id)))
            .query(&[
                ("subscribed_fields", "feed"),
                ("access_token", self.access_token.as_str()),
                ("appsecret_proof", self.proof.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Graph transport error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("subscription failed: HTTP {status}: {body}");
        }

        let result: SubscribeResponse = response.json().await?;
        if !result.success {
            anyhow::bail!("subscription was not confirmed by the Graph API");
        }

        info!(page_id = %self.page_id, "App subscribed to the page feed");
        Ok(())
    }

    /// Read back the page's app subscriptions (for `subscribe --verify`).
    pub async fn list_subscriptions(&self) -> anyhow::Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/subscribed_apps", self.object_url(&self.page_id)))
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("appsecret_proof", self.proof.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Graph transport error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("listing subscriptions failed: HTTP {status}: {body}");
        }

        Ok(response.json().await?)
    }
}

/// Classify a non-2xx Graph response.
///
/// Retryable iff the Graph error code is a known transient class, or the
/// HTTP status is a server error. Everything else (expired token, missing
/// post, permission errors) will not heal on its own.
fn classify_error_response(status: u16, body: &str) -> FetchError {
    let graph_error = serde_json::from_str::<GraphErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);

    let code = graph_error.as_ref().and_then(|error| error.code);
    let message = graph_error
        .and_then(|error| error.message)
        .unwrap_or_else(|| format!("HTTP {status}"));

    let retryable = status >= 500 || code.is_some_and(|code| RETRYABLE_GRAPH_CODES.contains(&code));

    let message = match code {
        Some(code) => format!("Graph API error (code {code}): {message}"),
        None => format!("Graph API error: {message}"),
    };

    FetchError { message, retryable }
}

fn parse_graph_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, GRAPH_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// First photo attachment with an image source, if any.
fn first_image_url(attachments: Option<GraphAttachments>) -> Option<String> {
    attachments?
        .data
        .into_iter()
        .find(|attachment| {
            attachment
                .media_type
                .as_deref()
                .is_none_or(|media_type| media_type == "photo")
        })
        .and_then(|attachment| attachment.media)
        .and_then(|media| media.image)
        .and_then(|image| image.src)
}
