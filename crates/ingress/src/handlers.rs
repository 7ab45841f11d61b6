/*!
 * Webhook Handlers
 *
 * The verification handshake and the signed event endpoint.
 *
 * The event endpoint verifies the HMAC over the *raw* request bytes
 * before any JSON parsing, then absorbs every per-entry failure: once the
 * signature is valid, Meta always gets a 200. Meta retries aggressively
 * on anything else, and a retried delivery is indistinguishable from a
 * duplicate, which the store and queue already collapse.
 */

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pagerelay_common::{EnqueueOutcome, verify_webhook_signature};
use pagerelay_domain::{ProcessPostJob, WebhookChange, WebhookData, WebhookEnvelope};

use crate::AppState;
use crate::metrics;

/// Handshake query parameters, bound to Meta's literal wire names.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /meta/webhook - subscription verification handshake
///
/// Responds with the challenge iff the mode is `subscribe` and the token
/// matches. No state is written.
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    if params.mode.as_deref() != Some("subscribe") {
        warn!(mode = ?params.mode, "Webhook verification with bad mode");
        return (StatusCode::FORBIDDEN, "Forbidden".to_string());
    }

    if params.verify_token.as_deref() != Some(state.config.verify_token.as_str()) {
        warn!("Webhook verification with bad verify token");
        return (StatusCode::FORBIDDEN, "Forbidden".to_string());
    }

    let Some(challenge) = params.challenge else {
        warn!("Webhook verification without challenge");
        return (StatusCode::BAD_REQUEST, "Missing challenge".to_string());
    };

    info!("Webhook verification handshake succeeded");
    (StatusCode::OK, challenge)
}

/// POST /meta/webhook - signed event delivery
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    metrics::WEBHOOKS_RECEIVED_TOTAL.inc();

    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|value| value.to_str().ok());

    let Some(signature) = signature else {
        warn!("Webhook delivery without signature header");
        metrics::SIGNATURE_FAILURES_TOTAL.inc();
        return (StatusCode::FORBIDDEN, "Invalid signature");
    };

    if !verify_webhook_signature(&body, signature, &state.config.app_secret) {
        warn!("Webhook delivery with invalid signature");
        metrics::SIGNATURE_FAILURES_TOTAL.inc();
        return (StatusCode::FORBIDDEN, "Invalid signature");
    }

    // Signature is valid; from here on the answer is always 200.
    let correlation_id = Uuid::new_v4();

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%correlation_id, error = %e, "Signed webhook body failed to parse");
            return (StatusCode::OK, "OK");
        }
    };

    if envelope.object != "page" {
        debug!(%correlation_id, object = %envelope.object, "Ignoring non-page webhook object");
        return (StatusCode::OK, "OK");
    }

    for entry in &envelope.entry {
        for change in &entry.changes {
            if let Err(e) = handle_change(&state, correlation_id, change).await {
                error!(
                    %correlation_id,
                    post_id = change.value.post_id.as_deref().unwrap_or("<none>"),
                    error = %e,
                    "Failed to process webhook change"
                );
            }
        }
    }

    (StatusCode::OK, "OK")
}

/// Process one feed change: gate, upsert, enqueue.
async fn handle_change(
    state: &AppState,
    correlation_id: Uuid,
    change: &WebhookChange,
) -> anyhow::Result<()> {
    if change.field != "feed" {
        debug!(%correlation_id, field = %change.field, "Skipping non-feed change");
        return Ok(());
    }

    let value = &change.value;

    if value.verb.as_deref() != Some("add") {
        debug!(%correlation_id, verb = ?value.verb, "Skipping non-add feed change");
        return Ok(());
    }

    let Some(fb_post_id) = value.post_id.as_deref() else {
        debug!(%correlation_id, "Skipping feed change without post_id");
        return Ok(());
    };

    // Optimization only: the authoritative age gate runs post-fetch in the
    // worker. A change without created_time is never skipped here.
    if let Some(created_time) = value.created_time {
        if is_too_old(created_time, state.config.max_post_age_minutes, Utc::now()) {
            info!(%correlation_id, fb_post_id, "Skipping post older than the age horizon");
            return Ok(());
        }
    }

    let details = serde_json::json!({
        "correlation_id": correlation_id,
        "item": value.item,
        "verb": value.verb,
        "created_time": value.created_time,
    });

    let (_, created) = state.store.get_or_create(fb_post_id, details).await?;

    if !created {
        debug!(%correlation_id, fb_post_id, "Duplicate webhook for known post");
        metrics::POSTS_DUPLICATE_TOTAL.inc();
        return Ok(());
    }

    let job = ProcessPostJob {
        fb_post_id: fb_post_id.to_string(),
        correlation_id,
        webhook_data: Some(WebhookData {
            message: value.message.clone(),
            from: value.from.clone(),
            created_time: value.created_time,
        }),
    };

    match state.queue.enqueue(&job, fb_post_id).await? {
        EnqueueOutcome::Enqueued(job_id) => {
            info!(%correlation_id, fb_post_id, job_id, "Post enqueued for processing");
            metrics::POSTS_ENQUEUED_TOTAL.inc();
        }
        EnqueueOutcome::AlreadyQueued => {
            debug!(%correlation_id, fb_post_id, "Job already queued for post");
            metrics::POSTS_DUPLICATE_TOTAL.inc();
        }
    }

    Ok(())
}

/// Whether a post created at `created_time` (epoch seconds) is past the
/// age horizon. A horizon of 0 disables the gate.
fn is_too_old(created_time: i64, max_age_minutes: i64, now: DateTime<Utc>) -> bool {
    if max_age_minutes <= 0 {
        return false;
    }
    let age_minutes = (now.timestamp() - created_time) / 60;
    age_minutes > max_age_minutes
}
