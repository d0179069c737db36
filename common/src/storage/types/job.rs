use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Work a queued job performs (spec.md §4.4's trigger: an expansion
/// ingestion enqueues an override-detection job after it commits).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    IngestSource,
    DetectOverrides,
}

/// Progress-bus state enum, exactly as spec.md §4.5 names it. This column
/// doubles as the job's queue status (`queued` = not yet claimed) and the
/// progress bus's per-job record (`state`/`pct`/`message`) — one row serves
/// both roles, matching spec.md §9's "single cache key per job, not a
/// pub/sub channel" design note.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Downloading,
    Extracting,
    Ocr,
    Chunking,
    Embedding,
    Saving,
    Ready,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Ready | JobState::Failed)
    }
}

pub const DEFAULT_LEASE_SECS: i64 = 300;
pub const DEFAULT_RESULT_TTL_SECS: i64 = 3600;

stored_object!(Job, "job", {
    kind: JobKind,
    args: Value,
    state: JobState,
    pct: i64,
    message: String,
    timeout_s: i64,
    result_ttl_s: i64,
    attempts: i64,
    worker_id: Option<String>,
    leased_until: Option<chrono::DateTime<chrono::Utc>>,
    result: Option<Value>,
    error: Option<String>
});

impl Job {
    pub fn new(kind: JobKind, args: Value, timeout_s: i64) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            kind,
            args,
            state: JobState::Queued,
            pct: 0,
            message: "queued".to_string(),
            timeout_s,
            result_ttl_s: DEFAULT_RESULT_TTL_SECS,
            attempts: 0,
            worker_id: None,
            leased_until: None,
            result: None,
            error: None,
        }
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {id}")))
    }

    /// FIFO claim within a single priority class: the oldest queued-or-expired-lease
    /// job is atomically leased to `worker_id`. Multiple worker processes race this
    /// query; SurrealDB's single-statement UPDATE...WHERE acts as the pipelined
    /// prune-count-append equivalent for job claiming.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease: chrono::Duration,
    ) -> Result<Option<Self>, AppError> {
        let mut candidates: Vec<Self> = db
            .query(
                "SELECT * FROM job WHERE state = 'queued' \
                 OR (state NOT IN ['ready', 'failed'] AND leased_until < $now) \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .bind(("now", now))
            .await?
            .take(0)?;

        let Some(candidate) = candidates.pop() else {
            return Ok(None);
        };

        let leased_until = now + lease;
        let mut updated: Vec<Self> = db
            .query(
                "UPDATE job SET worker_id = $worker_id, leased_until = $leased_until, \
                 attempts += 1, updated_at = time::now() WHERE id = $id RETURN AFTER",
            )
            .bind(("worker_id", worker_id.to_string()))
            .bind(("leased_until", leased_until))
            .bind(("id", surrealdb::sql::Thing::from(("job", candidate.id.as_str()))))
            .await?
            .take(0)?;

        Ok(updated.pop())
    }

    /// Progress updates must be monotonic in `pct` within a job until a
    /// terminal state (spec.md §8's universal invariant).
    pub async fn update_progress(
        &self,
        state: JobState,
        pct: i64,
        message: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let clamped_pct = pct.max(self.pct);
        db.client
            .query(
                "UPDATE job SET state = $state, pct = $pct, message = $message, \
                 updated_at = time::now() WHERE id = $id",
            )
            .bind(("state", state))
            .bind(("pct", clamped_pct))
            .bind(("message", message.to_string()))
            .bind(("id", surrealdb::sql::Thing::from(("job", self.id.as_str()))))
            .await?;
        Ok(())
    }

    pub async fn mark_ready(&self, result: Value, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE job SET state = 'ready', pct = 100, message = 'ready', \
                 result = $result, updated_at = time::now() WHERE id = $id",
            )
            .bind(("result", result))
            .bind(("id", surrealdb::sql::Thing::from(("job", self.id.as_str()))))
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, error: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE job SET state = 'failed', message = 'failed', \
                 error = $error, updated_at = time::now() WHERE id = $id",
            )
            .bind(("error", error.to_string()))
            .bind(("id", surrealdb::sql::Thing::from(("job", self.id.as_str()))))
            .await?;
        Ok(())
    }

    /// Count of in-flight `IngestSource` jobs, for the 50-concurrent global
    /// ceiling (spec.md §4.10). A job with an expired lease no longer counts,
    /// which doubles as that ceiling's "TTL safety-net": a crashed worker
    /// can't pin the counter forever.
    pub async fn count_active_ingest_jobs(db: &SurrealDbClient) -> Result<i64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            c: i64,
        }
        let mut result = db
            .query(
                "SELECT count() AS c FROM job WHERE kind = 'ingest_source' \
                 AND state NOT IN ['ready', 'failed'] \
                 AND (state = 'queued' OR leased_until > time::now()) GROUP ALL",
            )
            .await?;
        let rows: Vec<Row> = result.take(0)?;
        Ok(rows.first().map(|r| r.c).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_next_ready_is_fifo() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let mut first = Job::new(JobKind::IngestSource, serde_json::json!({"source_id": "a"}), 300);
        first.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        db.store_item(first.clone()).await.expect("store first");
        let second = Job::new(JobKind::IngestSource, serde_json::json!({"source_id": "b"}), 300);
        db.store_item(second).await.expect("store second");

        let claimed = Job::claim_next_ready(&db, "worker-1", chrono::Utc::now(), chrono::Duration::seconds(300))
            .await
            .expect("claim")
            .expect("job present");
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn update_progress_never_decreases_pct() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let job = Job::new(JobKind::IngestSource, serde_json::json!({}), 300);
        db.store_item(job.clone()).await.expect("store");

        job.update_progress(JobState::Downloading, 40, "downloading", &db)
            .await
            .expect("update");
        let mut with_pct = job.clone();
        with_pct.pct = 40;
        with_pct
            .update_progress(JobState::Extracting, 10, "buggy regression", &db)
            .await
            .expect("update");

        let fetched = Job::get_by_id(&job.id, &db).await.expect("fetch");
        assert_eq!(fetched.pct, 40);
    }

    #[test]
    fn ready_and_failed_are_terminal() {
        assert!(JobState::Ready.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Chunking.is_terminal());
    }

    #[tokio::test]
    async fn count_active_ingest_jobs_excludes_terminal_and_expired_leases() {
        let db = SurrealDbClient::memory().await.expect("memory db");

        let queued = Job::new(JobKind::IngestSource, serde_json::json!({}), 300);
        db.store_item(queued).await.expect("store queued");

        let mut leased = Job::new(JobKind::IngestSource, serde_json::json!({}), 300);
        leased.state = JobState::Downloading;
        leased.leased_until = Some(chrono::Utc::now() + chrono::Duration::seconds(60));
        db.store_item(leased).await.expect("store leased");

        let mut expired = Job::new(JobKind::IngestSource, serde_json::json!({}), 300);
        expired.state = JobState::Downloading;
        expired.leased_until = Some(chrono::Utc::now() - chrono::Duration::seconds(60));
        db.store_item(expired).await.expect("store expired");

        let mut done = Job::new(JobKind::IngestSource, serde_json::json!({}), 300);
        done.state = JobState::Ready;
        db.store_item(done).await.expect("store done");

        let override_job = Job::new(JobKind::DetectOverrides, serde_json::json!({}), 300);
        db.store_item(override_job).await.expect("store override job");

        let active = Job::count_active_ingest_jobs(&db).await.expect("count");
        assert_eq!(active, 2);
    }
}
