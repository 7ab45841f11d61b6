//! Post store: state machine persistence, audit trail, delivery log.
//!
//! Every status change in the system goes through [`PostStore::transition`]
//! (or [`PostStore::mark_for_retry`], which composes the same locked
//! update). A transition locks the row, validates the edge against the
//! [`PostStatus::can_transition`] table, and only when valid updates
//! the row and appends the `status_<target>` audit event in the same
//! transaction. An invalid edge logs a warning, writes nothing, and
//! returns `None`; racing workers on the same row therefore produce at
//! most one successful transition per attempted edge.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use pagerelay_domain::{Post, PostStatus};

use crate::error::{Error, Result};

/// Optional row fields written alongside a status change. Fields left
/// `None` keep their current value.
#[derive(Debug, Default, Clone)]
pub struct TransitionFields {
    pub last_error: Option<String>,
    pub discord_msg_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Absolute value; callers compute it from the row they hold locked
    /// so the count never regresses.
    pub retry_count: Option<i32>,
}

impl TransitionFields {
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            last_error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Content fields populated after a successful Graph fetch.
#[derive(Debug, Default, Clone)]
pub struct FetchedFields {
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub message: Option<String>,
    pub permalink: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct PostStore {
    pool: PgPool,
}

impl PostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetch a post by its upstream identifier.
    pub async fn find(&self, fb_post_id: &str) -> Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE fb_post_id = $1")
            .bind(fb_post_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(post)
    }

    /// Insert the post row if it does not exist yet; race-safe.
    ///
    /// Returns the row and whether this call created it. Concurrent calls
    /// on the same `fb_post_id` collapse to a single row: the insert uses
    /// `ON CONFLICT DO NOTHING` and the loser re-reads the winner. On
    /// creation a `webhook_received` audit event is appended in the same
    /// transaction.
    pub async fn get_or_create(
        &self,
        fb_post_id: &str,
        details: serde_json::Value,
    ) -> Result<(Post, bool)> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (fb_post_id, status)
            VALUES ($1, 'received')
            ON CONFLICT (fb_post_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(fb_post_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(post) = inserted {
            insert_event(&mut tx, fb_post_id, "webhook_received", &details).await?;
            tx.commit().await?;
            debug!(fb_post_id, "Post row created");
            return Ok((post, true));
        }

        drop(tx);

        // Someone else inserted first; our insert waited on their commit,
        // so the winner is visible now.
        let existing = self
            .find(fb_post_id)
            .await?
            .ok_or_else(|| Error::PostNotFound(fb_post_id.to_string()))?;

        Ok((existing, false))
    }

    /// Attempt a status transition.
    ///
    /// Returns `Some(post)` on success. Returns `None`, having written
    /// nothing, when the row is missing or the edge is not allowed; the
    /// caller must treat `None` as failure.
    pub async fn transition(
        &self,
        fb_post_id: &str,
        target: PostStatus,
        fields: TransitionFields,
        details: serde_json::Value,
    ) -> Result<Option<Post>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = lock_post(&mut tx, fb_post_id).await? else {
            warn!(fb_post_id, target = %target, "Transition requested for unknown post");
            return Ok(None);
        };

        if !current.status.can_transition(target) {
            warn!(
                fb_post_id,
                from = %current.status,
                to = %target,
                "Invalid transition requested, ignoring"
            );
            return Ok(None);
        }

        let updated = apply_transition(&mut tx, fb_post_id, target, &fields, &details).await?;

        tx.commit().await?;

        debug!(fb_post_id, from = %current.status, to = %target, "Post transitioned");

        Ok(Some(updated))
    }

    /// Send a post back to `received` for another delivery attempt.
    ///
    /// Increments `retry_count` (computed under the row lock), records the
    /// error, and appends both the `status_received` transition event and
    /// a `marked_for_retry` audit event in one transaction. Refuses
    /// (returns `None`) on rows whose current state has no edge back to
    /// `received`; in particular a `delivered` row is never touched.
    pub async fn mark_for_retry(&self, fb_post_id: &str, error: &str) -> Result<Option<Post>> {
        let mut tx = self.pool.begin().await?;

        let Some(current) = lock_post(&mut tx, fb_post_id).await? else {
            warn!(fb_post_id, "Retry requested for unknown post");
            return Ok(None);
        };

        if !current.status.can_transition(PostStatus::Received) {
            warn!(
                fb_post_id,
                status = %current.status,
                "Refusing to mark post for retry from its current state"
            );
            return Ok(None);
        }

        let fields = TransitionFields {
            last_error: Some(error.to_string()),
            retry_count: Some(current.retry_count + 1),
            ..TransitionFields::default()
        };
        let details = serde_json::json!({
            "error": error,
            "retry_count": current.retry_count + 1,
        });

        let updated =
            apply_transition(&mut tx, fb_post_id, PostStatus::Received, &fields, &details).await?;
        insert_event(&mut tx, fb_post_id, "marked_for_retry", &details).await?;

        tx.commit().await?;

        debug!(
            fb_post_id,
            retry_count = updated.retry_count,
            "Post marked for retry"
        );

        Ok(Some(updated))
    }

    /// Persist fetched content fields onto the row.
    ///
    /// Data-only write: does not touch `status` and records no event.
    pub async fn update_fetched_fields(
        &self,
        fb_post_id: &str,
        fields: &FetchedFields,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET author_id = $2,
                author_name = $3,
                message = $4,
                permalink = $5,
                created_at = $6
            WHERE fb_post_id = $1
            "#,
        )
        .bind(fb_post_id)
        .bind(&fields.author_id)
        .bind(&fields.author_name)
        .bind(&fields.message)
        .bind(&fields.permalink)
        .bind(fields.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append one delivery-attempt row, success or failure.
    pub async fn record_delivery(
        &self,
        fb_post_id: &str,
        success: bool,
        discord_msg_id: Option<&str>,
        error_message: Option<&str>,
        latency_ms: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_logs (fb_post_id, success, discord_msg_id, error_message, latency_ms)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(fb_post_id)
        .bind(success)
        .bind(discord_msg_id)
        .bind(error_message)
        .bind(latency_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete terminal posts past the retention horizon; events and
    /// delivery logs follow via `ON DELETE CASCADE`. Returns rows removed.
    pub async fn prune_terminal(&self, older_than_days: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM posts
            WHERE status IN ('delivered', 'ignored')
              AND COALESCE(delivered_at, received_at) < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(older_than_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// The validated, locked half of a transition: update the row and append
/// the `status_<target>` event. Callers hold the row lock and have
/// already checked the edge.
async fn apply_transition(
    tx: &mut Transaction<'_, Postgres>,
    fb_post_id: &str,
    target: PostStatus,
    fields: &TransitionFields,
    details: &serde_json::Value,
) -> Result<Post> {
    let updated = sqlx::query_as::<_, Post>(
        r#"
        UPDATE posts
        SET status = $2,
            last_error = COALESCE($3, last_error),
            discord_msg_id = COALESCE($4, discord_msg_id),
            delivered_at = COALESCE($5, delivered_at),
            retry_count = COALESCE($6, retry_count)
        WHERE fb_post_id = $1
        RETURNING *
        "#,
    )
    .bind(fb_post_id)
    .bind(target)
    .bind(&fields.last_error)
    .bind(&fields.discord_msg_id)
    .bind(fields.delivered_at)
    .bind(fields.retry_count)
    .fetch_one(&mut **tx)
    .await?;

    insert_event(tx, fb_post_id, &target.event_name(), details).await?;

    Ok(updated)
}

/// Lock a post row for the duration of the surrounding transaction.
async fn lock_post(
    tx: &mut Transaction<'_, Postgres>,
    fb_post_id: &str,
) -> Result<Option<Post>> {
    let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE fb_post_id = $1 FOR UPDATE")
        .bind(fb_post_id)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(post)
}

async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    fb_post_id: &str,
    event: &str,
    details: &serde_json::Value,
) -> Result<()> {
    sqlx::query("INSERT INTO post_events (fb_post_id, event, details) VALUES ($1, $2, $3)")
        .bind(fb_post_id)
        .bind(event)
        .bind(details)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
