//! Post lifecycle states and the allowed transitions between them.
//!
//! The pipeline only ever changes a post's status through
//! `PostStore::transition`, which consults [`PostStatus::can_transition`].
//! Any edge not listed here is a no-op at runtime.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a relayed post.
///
/// `Delivered` and `Ignored` are terminal: once a row reaches either, the
/// pipeline never mutates it again. `Failed` and `NeedsReview` can be sent
/// back to `Received` by an operator to re-run the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "post_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Received,
    Fetching,
    Eligible,
    Sending,
    Delivered,
    Ignored,
    Failed,
    NeedsReview,
}

impl PostStatus {
    /// Whether moving from `self` to `target` is an allowed edge.
    ///
    /// `Fetching -> Received` is the automatic retry re-entry;
    /// `Sending -> NeedsReview` is the ambiguous-dispatch outcome;
    /// `Failed/NeedsReview -> Received` are operator-initiated retries.
    pub fn can_transition(self, target: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, target),
            (Received, Fetching)
                | (Fetching, Eligible)
                | (Fetching, Ignored)
                | (Fetching, Failed)
                | (Fetching, Received)
                | (Eligible, Sending)
                | (Sending, Delivered)
                | (Sending, Failed)
                | (Sending, NeedsReview)
                | (Failed, Received)
                | (NeedsReview, Received)
        )
    }

    /// Terminal states are never mutated by the pipeline.
    pub fn is_terminal(self) -> bool {
        matches!(self, PostStatus::Delivered | PostStatus::Ignored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Received => "received",
            PostStatus::Fetching => "fetching",
            PostStatus::Eligible => "eligible",
            PostStatus::Sending => "sending",
            PostStatus::Delivered => "delivered",
            PostStatus::Ignored => "ignored",
            PostStatus::Failed => "failed",
            PostStatus::NeedsReview => "needs_review",
        }
    }

    /// Audit event name recorded alongside a transition into this state.
    pub fn event_name(self) -> String {
        format!("status_{}", self.as_str())
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::PostStatus::*;
    use super::*;

    const ALL: [PostStatus; 8] = [
        Received,
        Fetching,
        Eligible,
        Sending,
        Delivered,
        Ignored,
        Failed,
        NeedsReview,
    ];

    #[test]
    fn test_happy_path_edges() {
        assert!(Received.can_transition(Fetching));
        assert!(Fetching.can_transition(Eligible));
        assert!(Eligible.can_transition(Sending));
        assert!(Sending.can_transition(Delivered));
    }

    #[test]
    fn test_retry_reentry_edges() {
        assert!(Fetching.can_transition(Received));
        assert!(Failed.can_transition(Received));
        assert!(NeedsReview.can_transition(Received));
        // Sending must NOT re-enter automatically: a retry could duplicate.
        assert!(!Sending.can_transition(Received));
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        for target in ALL {
            assert!(!Delivered.can_transition(target));
            assert!(!Ignored.can_transition(target));
        }
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        // Every allowed edge, written out once; everything else is rejected.
        let allowed = [
            (Received, Fetching),
            (Fetching, Eligible),
            (Fetching, Ignored),
            (Fetching, Failed),
            (Fetching, Received),
            (Eligible, Sending),
            (Sending, Delivered),
            (Sending, Failed),
            (Sending, NeedsReview),
            (Failed, Received),
            (NeedsReview, Received),
        ];

        for from in ALL {
            for to in ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition(to),
                    expected,
                    "edge {from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(Delivered.event_name(), "status_delivered");
        assert_eq!(NeedsReview.event_name(), "status_needs_review");
    }
}
