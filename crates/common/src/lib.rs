//! # PageRelay Common Library
//!
//! Shared infrastructure code used by the ingress and worker services.
//!
//! This crate provides:
//! - Database connection pooling (PostgreSQL via sqlx)
//! - The durable Postgres-backed job queue with singleton keys
//! - The post store (state machine persistence, audit log, delivery log)
//! - Custom error types
//! - HMAC-SHA256 webhook signature helpers and the Graph app-secret proof
//! - Structured logging setup
//! - Retry backoff arithmetic

pub mod db;
pub mod error;
pub mod logging;
pub mod pgqueue;
pub mod retry;
pub mod signature;
pub mod store;

pub use db::create_pool;
pub use error::{Error, Result};
pub use logging::init_tracing;
pub use pgqueue::{EnqueueOutcome, JobState, PgQueue, QueuedJob, PROCESS_POST_QUEUE};
pub use signature::{app_secret_proof, sign, verify_webhook_signature};
pub use store::{FetchedFields, PostStore, TransitionFields};
