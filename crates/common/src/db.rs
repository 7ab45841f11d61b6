//! Database connection pool management
//!
//! One PostgreSQL pool per process; the ingress and the worker share the
//! database, never a pool. The ingress sits on Meta's acknowledgement
//! clock, so acquisition fails fast: a saturated pool should surface as
//! an unhealthy probe, not as handlers silently queueing until Meta gives
//! up and re-delivers.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::Result;

/// How long a caller may wait for a connection. Short on purpose: Meta
/// abandons slow webhook responses and retries, which only adds load.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle connections above the warm floor are released after this.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Periodic recycling so server-side restarts and failovers drain.
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Kept warm so the first webhook after a quiet stretch does not pay
/// connection setup inside the acknowledgement window.
const WARM_CONNECTIONS: u32 = 2;

/// Create a PostgreSQL connection pool
///
/// ```rust,ignore
/// let pool = create_pool("postgresql://localhost:5432/pagerelay", 10).await?;
/// ```
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(WARM_CONNECTIONS.min(max_connections))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME)
        .connect(database_url)
        .await?;

    // A bad DATABASE_URL should fail the boot, not the first webhook.
    let latency_ms = health_check(&pool).await?;
    info!(max_connections, latency_ms, "Database pool ready");

    Ok(pool)
}

/// Trivial store round-trip, returning the measured latency in
/// milliseconds for the health endpoints to report.
pub async fn health_check(pool: &PgPool) -> Result<u64> {
    let started = Instant::now();
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(started.elapsed().as_millis() as u64)
}

/// Pool utilization for the readiness payload: (open connections, idle).
pub fn pool_stats(pool: &PgPool) -> (u32, usize) {
    (pool.size(), pool.num_idle())
}
