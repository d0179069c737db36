use std::{convert::Infallible, time::Duration, time::Instant};

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use common::storage::types::{
    job::{Job, JobKind, JobState},
    source::Source,
};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

const INGEST_JOB_TIMEOUT_SECS: i64 = 900;
const ESTIMATED_SECONDS_PER_SOURCE: i64 = 90;
const STREAM_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STREAM_TIMEOUT: Duration = Duration::from_secs(300);
/// Global concurrency ceiling across all in-flight ingestion jobs (spec.md
/// §4.10), on top of the per-client hourly rate limit already enforced by
/// `rate_limit_ingest`.
const MAX_CONCURRENT_INGEST_JOBS: i64 = 50;

#[derive(Deserialize)]
pub struct IngestRequest {
    pub source_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub job_id: String,
    pub source_id: String,
    pub status_url: String,
    pub events_url: String,
    pub estimated_seconds: i64,
}

/// `POST /ingest` (spec.md §6). Enqueues an `IngestSource` job; ingestion
/// itself always runs out-of-process in a worker (§5).
pub async fn trigger_ingest(
    State(state): State<ApiState>,
    Json(request): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = Source::get_by_id(&request.source_id, &state.db).await?;

    let active = Job::count_active_ingest_jobs(&state.db).await.map_err(common::error::AppError::from)?;
    if active >= MAX_CONCURRENT_INGEST_JOBS {
        return Err(common::error::AppError::RateLimited(
            "global ingestion concurrency ceiling reached, try again shortly".to_string(),
        )
        .into());
    }

    let job = Job::new(
        JobKind::IngestSource,
        serde_json::json!({ "source_id": source.id, "force": request.force }),
        INGEST_JOB_TIMEOUT_SECS,
    );
    state
        .db
        .store_item(job.clone())
        .await
        .map_err(common::error::AppError::from)?;

    Ok(Json(IngestResponse {
        job_id: job.id.clone(),
        source_id: source.id,
        status_url: format!("/api/v1/ingest/{}/status", job.id),
        events_url: format!("/api/v1/ingest/{}/events", job.id),
        estimated_seconds: ESTIMATED_SECONDS_PER_SOURCE,
    }))
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    pub state: JobState,
    pub pct: i64,
    pub message: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// `GET /ingest/{job_id}/status`.
pub async fn ingest_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = Job::get_by_id(&job_id, &state.db).await?;
    Ok(Json(JobStatusResponse {
        state: job.state,
        pct: job.pct,
        message: job.message,
        result: job.result,
        error: job.error,
    }))
}

#[derive(Serialize)]
struct ProgressEventPayload {
    state: JobState,
    pct: i64,
    msg: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
}

/// `GET /ingest/{job_id}/events` (spec.md §4.5, §6): polls the job's
/// progress-bus record and emits one event per `(state, pct)` change, a
/// keep-alive comment every 15s of quiet (handled by axum's `Sse::keep_alive`),
/// and a final event after 300s if the job hasn't reached a terminal state.
pub async fn ingest_events(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Confirm the job exists before opening the stream, so an unknown id
    // surfaces as a normal 404 rather than an empty/hanging stream.
    Job::get_by_id(&job_id, &state.db).await?;

    let db = state.db.clone();
    let stream = async_stream::stream! {
        yield Ok(Event::default().comment("stream open"));

        let mut last: Option<(JobState, i64)> = None;
        let mut seq: u64 = 0;
        let started = Instant::now();
        let mut ticker = tokio::time::interval(STREAM_POLL_INTERVAL);

        loop {
            ticker.tick().await;

            if started.elapsed() > STREAM_TIMEOUT {
                seq += 1;
                yield Ok(Event::default()
                    .id(seq.to_string())
                    .event("error")
                    .data(
                        serde_json::json!({
                            "state": "unknown",
                            "pct": 0,
                            "msg": "stream timed out before the job reached a terminal state",
                            "result": null,
                            "error": "timeout",
                        })
                        .to_string(),
                    ));
                break;
            }

            let job = match Job::get_by_id(&job_id, &db).await {
                Ok(job) => job,
                Err(err) => {
                    seq += 1;
                    yield Ok(Event::default()
                        .id(seq.to_string())
                        .event("error")
                        .data(
                            serde_json::json!({
                                "state": "unknown",
                                "pct": 0,
                                "msg": "job lookup failed",
                                "result": null,
                                "error": err.to_string(),
                            })
                            .to_string(),
                        ));
                    break;
                }
            };

            if last != Some((job.state, job.pct)) {
                last = Some((job.state, job.pct));
                seq += 1;
                let event_name = match job.state {
                    JobState::Failed => "error",
                    JobState::Ready => "complete",
                    _ => "progress",
                };
                let payload = ProgressEventPayload {
                    state: job.state,
                    pct: job.pct,
                    msg: job.message,
                    result: job.result,
                    error: job.error,
                };
                if let Ok(data) = serde_json::to_string(&payload) {
                    yield Ok(Event::default().id(seq.to_string()).event(event_name).data(data));
                }
            }

            if job.state.is_terminal() {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("")))
}
