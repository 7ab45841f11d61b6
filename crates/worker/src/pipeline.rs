/*!
 * Post Processing Pipeline
 *
 * Drives one claimed job through the post state machine. Every status
 * change goes through `PostStore::transition`, so an edge the table
 * forbids becomes a logged no-op instead of a corrupted row.
 *
 * Error contract with the consumer: `Err` means "retry me", and the queue
 * reschedules the job with backoff. Every other outcome (ignored, failed,
 * needs_review, delivered, suppressed) is handled here with a transition
 * and an `Ok` return, which completes the job.
 */

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::time::Instant;
use tracing::{info, warn};

use pagerelay_common::{FetchedFields, PostStore, TransitionFields};
use pagerelay_domain::{PostStatus, ProcessPostJob};

use crate::discord::{DiscordClient, DispatchError};
use crate::graph::{FetchedPost, GraphClient};
use crate::metrics;

pub struct PostPipeline {
    store: PostStore,
    graph: GraphClient,
    discord: DiscordClient,
    alerts_enabled: bool,
    max_post_age_minutes: i64,
}

impl PostPipeline {
    pub fn new(
        store: PostStore,
        graph: GraphClient,
        discord: DiscordClient,
        alerts_enabled: bool,
        max_post_age_minutes: i64,
    ) -> Self {
        Self {
            store,
            graph,
            discord,
            alerts_enabled,
            max_post_age_minutes,
        }
    }

    /// Process one job to a terminal outcome or a retry.
    pub async fn process(&self, job: &ProcessPostJob) -> Result<()> {
        let fb_post_id = job.fb_post_id.as_str();
        let correlation_id = job.correlation_id;

        // 1. Load; a missing or already-terminal row completes the job.
        let Some(post) = self.store.find(fb_post_id).await? else {
            warn!(%correlation_id, fb_post_id, "Job references unknown post, dropping");
            return Ok(());
        };

        if post.status.is_terminal() {
            info!(
                %correlation_id,
                fb_post_id,
                status = %post.status,
                "Post already in a terminal state, nothing to do"
            );
            return Ok(());
        }

        // 2. Kill switch: suppress, don't defer. The job completes and the
        // post stays where it is.
        if !self.alerts_enabled {
            info!(%correlation_id, fb_post_id, "Alerts disabled, suppressing post");
            return Ok(());
        }

        // 3. Enter fetching.
        let details = serde_json::json!({"correlation_id": correlation_id});
        if self
            .store
            .transition(
                fb_post_id,
                PostStatus::Fetching,
                TransitionFields::default(),
                details.clone(),
            )
            .await?
            .is_none()
        {
            warn!(
                %correlation_id,
                fb_post_id,
                status = %post.status,
                "Post not in a fetchable state, leaving for operator review"
            );
            return Ok(());
        }

        // 4. Fetch, with the inline webhook body as a reduced-fidelity
        // fallback. The fallback is only taken when the webhook carried a
        // message; an empty fallback could silently mis-filter the post.
        let fetched = match self.graph.fetch_post(fb_post_id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                metrics::FETCH_FAILURES_TOTAL
                    .with_label_values(&[if err.retryable { "true" } else { "false" }])
                    .inc();

                let fallback = job
                    .webhook_data
                    .as_ref()
                    .filter(|data| data.message.is_some());

                if let Some(data) = fallback {
                    warn!(
                        %correlation_id,
                        fb_post_id,
                        error = %err,
                        "Fetch failed, using inline webhook data"
                    );
                    synthesize_from_webhook(fb_post_id, data)
                } else if err.retryable {
                    self.store.mark_for_retry(fb_post_id, &err.message).await?;
                    anyhow::bail!("fetch failed (retryable): {}", err.message);
                } else {
                    self.store
                        .transition(
                            fb_post_id,
                            PostStatus::Failed,
                            TransitionFields::with_error(&err.message),
                            serde_json::json!({
                                "correlation_id": correlation_id,
                                "error": err.message,
                            }),
                        )
                        .await?;
                    return Ok(());
                }
            }
        };

        // 5. Persist the fetched fields. Data-only write; status untouched.
        self.store
            .update_fetched_fields(
                fb_post_id,
                &FetchedFields {
                    author_id: fetched.author_id.clone(),
                    author_name: fetched.author_name.clone(),
                    message: fetched.message.clone(),
                    permalink: fetched.permalink.clone(),
                    created_at: fetched.created_time,
                },
            )
            .await?;

        // 6. Age gate against the authoritative created_time. A post whose
        // age cannot be established is treated as too old.
        if self.max_post_age_minutes > 0 {
            let fresh = fetched.created_time.is_some_and(|created| {
                (Utc::now() - created).num_minutes() <= self.max_post_age_minutes
            });

            if !fresh {
                info!(%correlation_id, fb_post_id, "Post past the age horizon, ignoring");
                self.store
                    .transition(
                        fb_post_id,
                        PostStatus::Ignored,
                        TransitionFields::default(),
                        serde_json::json!({
                            "correlation_id": correlation_id,
                            "reason": "Post too old",
                        }),
                    )
                    .await?;
                return Ok(());
            }
        }

        // 7. Trigger tag filter.
        let message = fetched.message.as_deref().unwrap_or_default();
        if !self.discord.has_trigger(message) {
            info!(%correlation_id, fb_post_id, "No trigger tag, ignoring post");
            self.store
                .transition(
                    fb_post_id,
                    PostStatus::Ignored,
                    TransitionFields::default(),
                    serde_json::json!({
                        "correlation_id": correlation_id,
                        "reason": "No trigger tag",
                    }),
                )
                .await?;
            return Ok(());
        }

        // 8. Eligible, then sending.
        for target in [PostStatus::Eligible, PostStatus::Sending] {
            if self
                .store
                .transition(fb_post_id, target, TransitionFields::default(), details.clone())
                .await?
                .is_none()
            {
                warn!(%correlation_id, fb_post_id, target = %target, "Lost the transition race");
                return Ok(());
            }
        }

        // 9-11. Dispatch, record the attempt, settle the outcome.
        let started = Instant::now();
        let outcome = self.discord.send_post(&fetched).await;
        let latency_ms = started.elapsed().as_millis() as i32;

        metrics::DELIVERY_DURATION.observe(latency_ms as f64 / 1000.0);

        match outcome {
            Ok(success) => {
                self.store
                    .record_delivery(
                        fb_post_id,
                        true,
                        success.message_id.as_deref(),
                        None,
                        latency_ms,
                    )
                    .await?;
                metrics::DELIVERIES_TOTAL.with_label_values(&["success"]).inc();

                // The row's discord_msg_id must be present on a delivered
                // post even when the sink was not asked for an id.
                let discord_msg_id = success
                    .message_id
                    .unwrap_or_else(|| "unconfirmed".to_string());

                self.store
                    .transition(
                        fb_post_id,
                        PostStatus::Delivered,
                        TransitionFields {
                            discord_msg_id: Some(discord_msg_id.clone()),
                            delivered_at: Some(Utc::now()),
                            ..TransitionFields::default()
                        },
                        serde_json::json!({
                            "correlation_id": correlation_id,
                            "discord_msg_id": discord_msg_id,
                            "latency_ms": latency_ms,
                        }),
                    )
                    .await?;

                info!(%correlation_id, fb_post_id, latency_ms, "✅ Post delivered");
                Ok(())
            }

            Err(DispatchError::Ambiguous(reason)) => {
                self.store
                    .record_delivery(fb_post_id, false, None, Some(&reason), latency_ms)
                    .await?;
                metrics::DELIVERIES_TOTAL.with_label_values(&["ambiguous"]).inc();

                // The bytes may have reached Discord; retrying could
                // duplicate. Park for a human.
                self.store
                    .transition(
                        fb_post_id,
                        PostStatus::NeedsReview,
                        TransitionFields::with_error(&reason),
                        serde_json::json!({
                            "correlation_id": correlation_id,
                            "error": reason,
                        }),
                    )
                    .await?;

                warn!(%correlation_id, fb_post_id, "⚠️  Ambiguous dispatch, post needs review");
                Ok(())
            }

            Err(DispatchError::Retryable {
                message,
                retry_after_ms,
            }) => {
                self.store
                    .record_delivery(fb_post_id, false, None, Some(&message), latency_ms)
                    .await?;
                metrics::DELIVERIES_TOTAL.with_label_values(&["retryable"]).inc();

                if let Some(retry_after_ms) = retry_after_ms {
                    // Informational only; the queue's backoff is authoritative.
                    info!(%correlation_id, fb_post_id, retry_after_ms, "Sink requested backoff");
                }

                self.store.mark_for_retry(fb_post_id, &message).await?;
                anyhow::bail!("dispatch failed (retryable): {message}");
            }

            Err(DispatchError::Fatal(message)) => {
                self.store
                    .record_delivery(fb_post_id, false, None, Some(&message), latency_ms)
                    .await?;
                metrics::DELIVERIES_TOTAL.with_label_values(&["fatal"]).inc();

                self.store
                    .transition(
                        fb_post_id,
                        PostStatus::Failed,
                        TransitionFields::with_error(&message),
                        serde_json::json!({
                            "correlation_id": correlation_id,
                            "error": message,
                        }),
                    )
                    .await?;

                warn!(%correlation_id, fb_post_id, "❌ Dispatch rejected, post failed");
                Ok(())
            }
        }
    }
}

/// Build a reduced-fidelity post from the inline webhook payload. No
/// permalink or attachments; the author id comes from the webhook entry,
/// which is the page id by construction.
fn synthesize_from_webhook(
    fb_post_id: &str,
    data: &pagerelay_domain::WebhookData,
) -> FetchedPost {
    FetchedPost {
        id: fb_post_id.to_string(),
        message: data.message.clone(),
        permalink: None,
        created_time: data
            .created_time
            .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single()),
        author_id: data.from.as_ref().map(|from| from.id.clone()),
        author_name: data.from.as_ref().and_then(|from| from.name.clone()),
        image_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagerelay_domain::{WebhookAuthor, WebhookData};

    #[test]
    fn test_synthesize_from_webhook() {
        let data = WebhookData {
            message: Some("Buy AAPL #discord".to_string()),
            from: Some(WebhookAuthor {
                id: "1234567890".to_string(),
                name: Some("Example Page".to_string()),
            }),
            created_time: Some(1_700_000_000),
        };

        let post = synthesize_from_webhook("1234567890_111", &data);

        assert_eq!(post.id, "1234567890_111");
        assert_eq!(post.message.as_deref(), Some("Buy AAPL #discord"));
        assert_eq!(post.author_id.as_deref(), Some("1234567890"));
        assert_eq!(post.created_time.unwrap().timestamp(), 1_700_000_000);
        assert!(post.permalink.is_none());
        assert!(post.image_url.is_none());
    }

    #[test]
    fn test_synthesize_tolerates_missing_fields() {
        let post = synthesize_from_webhook("1_2", &WebhookData::default());
        assert!(post.message.is_none());
        assert!(post.author_id.is_none());
        assert!(post.created_time.is_none());
    }
}
