//! Error types for PageRelay
//!
//! The store and the queue surface everything through this enum; the
//! service binaries add `anyhow` context at their edges and decide
//! whether an error completes, retries, or fails the job at hand.

use thiserror::Error;

/// Main error type for PageRelay operations
#[derive(Debug, Error)]
pub enum Error {
    /// Database errors (PostgreSQL via sqlx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON errors (queue payloads, audit event details)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A post row that should exist is gone. Seen when a job outlives its
    /// row (operator SQL, retention pruning).
    #[error("Post not found: {0}")]
    PostNotFound(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether a sqlx error is a duplicate-key violation on the named
    /// unique index.
    ///
    /// Both race guards in the system funnel through this check: the
    /// queue's live-singleton index and the `posts.fb_post_id` key. The
    /// race loser recovers (re-reads the winner, or reports "already
    /// queued") instead of propagating a failure.
    pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
        match err {
            sqlx::Error::Database(db_err) => {
                db_err.is_unique_violation() && db_err.constraint() == Some(constraint)
            }
            _ => false,
        }
    }
}

/// Result type alias for PageRelay operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_not_found_display() {
        let err = Error::PostNotFound("1234567890_111".to_string());
        assert_eq!(err.to_string(), "Post not found: 1234567890_111");
    }

    #[test]
    fn test_sqlx_errors_convert() {
        let our_err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(our_err, Error::Database(_)));
    }

    #[test]
    fn test_unique_violation_ignores_other_errors() {
        // Only database-level duplicate-key errors qualify
        assert!(!Error::is_unique_violation(
            &sqlx::Error::RowNotFound,
            "relay_jobs_live_singleton_idx"
        ));
        assert!(!Error::is_unique_violation(
            &sqlx::Error::PoolTimedOut,
            "relay_jobs_live_singleton_idx"
        ));
    }
}
