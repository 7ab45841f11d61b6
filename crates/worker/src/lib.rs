/*!
 * Delivery Worker
 *
 * Consumes `process-post` jobs and drives each post through its state
 * machine: fetch from the Graph API, filter on the trigger tag, dispatch
 * to Discord, record the outcome.
 *
 * ```text
 * relay_jobs ──claim batch──> pipeline
 *                               │ fetch (Graph)          retryable err ──> mark_for_retry + requeue
 *                               │ age gate / tag filter  miss ──────────> ignored
 *                               │ dispatch (Discord)     ambiguous ─────> needs_review
 *                               └─ record delivery log   success ───────> delivered
 * ```
 *
 * The worker refuses to start when the configured page token is unusable
 * (`verify_page_access`), so token expiry fails loudly instead of
 * spinning the retry loop.
 */

pub mod config;
pub mod consumer;
pub mod discord;
pub mod graph;
pub mod health;
pub mod janitor;
pub mod metrics;
pub mod pipeline;

pub use config::{GraphSettings, WorkerConfig};
pub use consumer::Consumer;
pub use discord::{DiscordClient, DispatchError, DispatchSuccess};
pub use graph::{FetchError, FetchedPost, GraphClient};
pub use pipeline::PostPipeline;
