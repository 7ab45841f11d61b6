/*!
 * Queue Consumer
 *
 * Claims batches of `process-post` jobs and runs each through the
 * pipeline, sequentially within a batch. Multiple worker processes can
 * run in parallel: the queue's `SKIP LOCKED` claim and the state
 * machine's edge validation keep them from stepping on each other.
 *
 * A pipeline `Err` is the retry signal: the job is rescheduled with
 * backoff (or failed terminally once its attempts are exhausted).
 */

use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

use pagerelay_common::PgQueue;
use pagerelay_domain::ProcessPostJob;

use crate::metrics;
use crate::pipeline::PostPipeline;

pub struct Consumer {
    queue: PgQueue,
    pipeline: PostPipeline,
    batch_size: i64,
    poll_interval: Duration,
}

impl Consumer {
    pub fn new(
        queue: PgQueue,
        pipeline: PostPipeline,
        batch_size: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            pipeline,
            batch_size,
            poll_interval,
        }
    }

    /// Run until shutdown. The current batch always finishes; no new
    /// batch is claimed after the signal.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            queue = self.queue.queue_name(),
            batch_size = self.batch_size,
            "Consumer started"
        );

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let jobs = match self.queue.dequeue(self.batch_size).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "Failed to dequeue jobs, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown_rx.recv() => break,
                }
                continue;
            }

            for job in jobs {
                metrics::JOBS_CONSUMED_TOTAL.inc();

                let parsed: ProcessPostJob = match job.parse_payload() {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        // Undecodable payloads can never succeed; fail now
                        // instead of burning retry attempts.
                        error!(job_id = job.id, error = %e, "Job payload failed to parse");
                        if let Err(e) = self.queue.fail(&job, &e.to_string()).await {
                            error!(job_id = job.id, error = %e, "Failed to fail job");
                        }
                        continue;
                    }
                };

                match self.pipeline.process(&parsed).await {
                    Ok(()) => {
                        if let Err(e) = self.queue.complete(&job).await {
                            error!(job_id = job.id, error = %e, "Failed to complete job");
                        }
                    }
                    Err(e) => {
                        if let Err(retry_err) = self.queue.retry(&job, &e.to_string()).await {
                            error!(
                                job_id = job.id,
                                error = %retry_err,
                                "Failed to reschedule job"
                            );
                        }
                    }
                }
            }
        }

        info!("Consumer stopped");
    }
}
