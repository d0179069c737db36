use std::{collections::HashSet, time::Instant};

use axum::{extract::State, response::IntoResponse, Json};
use common::error::AppError;
use common::storage::types::{
    answer_cache::{self, AnswerCacheEntry},
    api_cost::ApiCost,
    ask_history::{AskHistory, Citation, ConfidenceLevel},
    chunk::Chunk,
    game::Game,
    job::{Job, JobKind},
    source::Source,
};
use retrieval_pipeline::{answer_question, hybrid_search, SupersededRule};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

const QUESTION_MIN_CHARS: usize = 5;
const QUESTION_MAX_CHARS: usize = 1000;
const INGEST_JOB_TIMEOUT_SECS: i64 = 900;
const ESTIMATED_SECONDS_PER_SOURCE: i64 = 90;
const ANSWER_CACHE_TTL: chrono::Duration = chrono::Duration::hours(1);

#[derive(Deserialize)]
pub struct AskRequest {
    pub game_id: String,
    pub edition: Option<String>,
    pub question: String,
    pub expansion_ids: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct SupersededRuleResponse {
    pub quote: String,
    pub page: i64,
    pub reason: String,
    pub confidence: f64,
}

impl From<SupersededRule> for SupersededRuleResponse {
    fn from(rule: SupersededRule) -> Self {
        Self { quote: rule.quote, page: rule.page, reason: rule.reason, confidence: rule.confidence }
    }
}

#[derive(Serialize)]
pub struct AskResponse {
    pub verdict: String,
    pub confidence: ConfidenceLevel,
    pub citations: Vec<Citation>,
    pub superseded_rule: Option<SupersededRuleResponse>,
    pub conflict_note: Option<String>,
    pub notes: Vec<String>,
    pub cached: bool,
    pub response_time_ms: i64,
    pub history_id: Option<String>,
}

/// The subset of `AskResponse` that survives into the shared answer cache;
/// `cached` and `response_time_ms` are recomputed on every read instead.
#[derive(Serialize, Deserialize)]
struct CachedAnswer {
    verdict: String,
    confidence: ConfidenceLevel,
    citations: Vec<Citation>,
    superseded_rule: Option<SupersededRuleResponse>,
    conflict_note: Option<String>,
    notes: Vec<String>,
    history_id: Option<String>,
}

#[derive(Serialize)]
struct IndexingResponse {
    status: &'static str,
    job_id: String,
    job_ids: Vec<String>,
    status_url: String,
    sources_to_index: usize,
    estimated_seconds: i64,
}

/// `POST /ask` (spec.md §6): cache lookup, indexing-gap detection, hybrid
/// retrieval, answer generation/verification, history + cost logging.
pub async fn ask(
    State(state): State<ApiState>,
    Json(request): Json<AskRequest>,
) -> Result<axum::response::Response, ApiError> {
    let start = Instant::now();
    let question_len = request.question.chars().count();
    if !(QUESTION_MIN_CHARS..=QUESTION_MAX_CHARS).contains(&question_len) {
        return Err(ApiError::ValidationError(format!(
            "question must be {QUESTION_MIN_CHARS}-{QUESTION_MAX_CHARS} characters, got {question_len}"
        )));
    }

    let game = Game::get_by_id(&request.game_id, &state.db).await?;
    let sources = Source::list_for_game(&game.id, &state.db).await?;
    if sources.is_empty() {
        return Err(ApiError::NotFound(format!("no sources configured for game {}", game.id)));
    }

    let edition = match &request.edition {
        Some(requested) => {
            if !sources.iter().any(|s| &s.edition == requested) {
                return Err(ApiError::NotFound(format!(
                    "edition {requested} not found for game {}",
                    game.id
                )));
            }
            requested.clone()
        }
        None => {
            let mut editions: Vec<&str> = sources.iter().map(|s| s.edition.as_str()).collect();
            editions.sort_unstable();
            editions.dedup();
            editions.first().map(|e| e.to_string()).unwrap_or_default()
        }
    };

    let expansion_ids = request.expansion_ids.clone().unwrap_or_default();
    let active_sources: Vec<&Source> = sources
        .iter()
        .filter(|s| match &s.expansion_id {
            None => s.edition == edition,
            Some(expansion_id) => expansion_ids.contains(expansion_id),
        })
        .collect();

    if active_sources.is_empty() {
        return Err(ApiError::NotFound(format!(
            "no sources configured for game {} edition {edition}",
            game.id
        )));
    }

    let source_ids: Vec<String> = active_sources.iter().map(|s| s.id.clone()).collect();
    let indexed_chunks = Chunk::non_expired_for_sources(&source_ids, &state.db).await?;
    let indexed_source_ids: HashSet<String> =
        indexed_chunks.iter().map(|c| c.source_id.clone()).collect();
    let unindexed: Vec<&Source> =
        active_sources.iter().filter(|s| !indexed_source_ids.contains(&s.id)).copied().collect();

    if !unindexed.is_empty() {
        let mut job_ids = Vec::with_capacity(unindexed.len());
        for source in &unindexed {
            let job = Job::new(
                JobKind::IngestSource,
                serde_json::json!({ "source_id": source.id }),
                INGEST_JOB_TIMEOUT_SECS,
            );
            state.db.store_item(job.clone()).await.map_err(AppError::from)?;
            job_ids.push(job.id);
        }
        let primary_job_id = job_ids[0].clone();
        return Ok((
            axum::http::StatusCode::ACCEPTED,
            Json(IndexingResponse {
                status: "indexing",
                status_url: format!("/api/v1/ingest/{primary_job_id}/status"),
                job_id: primary_job_id,
                sources_to_index: unindexed.len(),
                estimated_seconds: ESTIMATED_SECONDS_PER_SOURCE * unindexed.len() as i64,
                job_ids,
            }),
        )
            .into_response());
    }

    let normalized_question = common::storage::types::ask_history::normalize_question(&request.question);
    let cache_key = answer_cache::cache_key(&game.id, Some(&edition), &expansion_ids, &normalized_question);

    if let Some(entry) = AnswerCacheEntry::get_live(&cache_key, &state.db).await? {
        if let Ok(cached) = serde_json::from_value::<CachedAnswer>(entry.payload) {
            return Ok(Json(AskResponse {
                verdict: cached.verdict,
                confidence: cached.confidence,
                citations: cached.citations,
                superseded_rule: cached.superseded_rule,
                conflict_note: cached.conflict_note,
                notes: cached.notes,
                cached: true,
                response_time_ms: start.elapsed().as_millis() as i64,
                history_id: cached.history_id,
            })
            .into_response());
        }
    }

    let retrieval = hybrid_search(
        &state.db,
        &state.openai_client,
        &state.query_cache,
        &state.retrieval_config,
        &request.question,
        &source_ids,
        &expansion_ids,
    )
    .await?;

    let expansion_name = match expansion_ids.first() {
        Some(id) => common::storage::types::expansion::Expansion::get_by_id(id, &state.db)
            .await
            .ok()
            .map(|e| e.name),
        None => None,
    };
    let outcome = answer_question(
        &state.openai_client,
        &state.db,
        &state.retrieval_config.chat_model,
        &game.name,
        Some(edition.as_str()),
        expansion_name.as_deref(),
        &request.question,
        &retrieval,
    )
    .await?;

    let response_time_ms = start.elapsed().as_millis() as i64;

    let history = AskHistory::new(
        game.id.clone(),
        Some(edition.clone()),
        expansion_ids.clone(),
        request.question.clone(),
        normalized_question,
        outcome.verdict.clone(),
        outcome.confidence,
        outcome.confidence_reason.clone(),
        outcome.citations.clone(),
        response_time_ms,
        outcome.model_used.clone(),
    );
    state.db.store_item(history.clone()).await.map_err(AppError::from)?;

    // Token usage is not yet threaded back out of answer_generator's
    // async-openai calls; logged as zero-cost so api_cost rows still exist
    // for the budget gate's bookkeeping. TODO: surface `Usage` from the
    // chat-completion response and charge it here.
    let cost = ApiCost::new(
        history.id.clone(),
        "/ask".to_string(),
        outcome.model_used.clone(),
        0,
        0,
        false,
    );
    state.db.store_item(cost).await.map_err(AppError::from)?;

    let superseded_rule: Option<SupersededRuleResponse> = outcome.superseded_rule.map(Into::into);
    let cached_answer = CachedAnswer {
        verdict: outcome.verdict.clone(),
        confidence: outcome.confidence,
        citations: outcome.citations.clone(),
        superseded_rule,
        conflict_note: outcome.conflict_note.clone(),
        notes: outcome.notes.clone(),
        history_id: Some(history.id.clone()),
    };
    if let Ok(payload) = serde_json::to_value(&cached_answer) {
        AnswerCacheEntry::put(cache_key, payload, ANSWER_CACHE_TTL, &state.db).await?;
    }

    Ok(Json(AskResponse {
        verdict: outcome.verdict,
        confidence: outcome.confidence,
        citations: outcome.citations,
        superseded_rule: cached_answer.superseded_rule,
        conflict_note: outcome.conflict_note,
        notes: outcome.notes,
        cached: false,
        response_time_ms,
        history_id: Some(history.id),
    })
    .into_response())
}
