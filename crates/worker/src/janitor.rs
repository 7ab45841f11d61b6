/*!
 * Maintenance Loop
 *
 * Hourly housekeeping: archive terminal queue jobs and prune posts that
 * have sat in a terminal state past the retention horizon. Events and
 * delivery logs go with their parent post via cascade.
 */

use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

use pagerelay_common::{PgQueue, PostStore};

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn run(
    store: PostStore,
    queue: PgQueue,
    queue_archive_days: i32,
    post_retention_days: i32,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    // The immediate first tick doubles as a startup sweep.
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match queue.archive(queue_archive_days).await {
                    Ok(0) => {}
                    Ok(archived) => info!(archived, "Archived terminal queue jobs"),
                    Err(e) => error!(error = %e, "Queue archival failed"),
                }

                match store.prune_terminal(post_retention_days).await {
                    Ok(0) => {}
                    Ok(pruned) => info!(pruned, "Pruned terminal posts"),
                    Err(e) => error!(error = %e, "Post pruning failed"),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    info!("Janitor stopped");
}
