#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod maintenance;
pub mod ocr;
pub mod override_detector;
pub mod pipeline;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::job::{Job, DEFAULT_LEASE_SECS},
};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Claims and drives queued jobs (source ingestion and override detection)
/// one at a time until the process is killed. A crashed worker's lease simply
/// expires and `Job::claim_next_ready` hands the job to the next poller.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("ingestion-worker-{}", Uuid::new_v4());
    let lease = chrono::Duration::seconds(DEFAULT_LEASE_SECS);
    let idle_backoff = Duration::from_millis(500);

    loop {
        match Job::claim_next_ready(&db, &worker_id, Utc::now(), lease).await {
            Ok(Some(job)) => {
                info!(%worker_id, job_id = %job.id, attempts = job.attempts, "claimed job");
                match ingestion_pipeline.process_job(&job).await {
                    Ok(()) => {
                        if let Err(err) = job.mark_ready(serde_json::json!({}), &db).await {
                            error!(%worker_id, job_id = %job.id, error = %err, "failed to mark job ready");
                        }
                    }
                    Err(err) => {
                        warn!(%worker_id, job_id = %job.id, error = %err, "job failed");
                        if let Err(mark_err) = job.mark_failed(&err.to_string(), &db).await {
                            error!(%worker_id, job_id = %job.id, error = %mark_err, "failed to mark job failed");
                        }
                    }
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim job");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
