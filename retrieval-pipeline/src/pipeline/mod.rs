pub mod config;

use std::collections::HashMap;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            ask_history::{Citation, ConfidenceLevel},
            chunk::Chunk,
            StoredObject,
        },
    },
};
use tracing::{info, instrument};

pub use config::{RetrievalConfig, RetrievalTuning};

use crate::{
    answer_generator::{self, RawAnswerPayload},
    cache::QueryEmbeddingCache,
    citation, confidence,
    conflict::{self, ConflictVerdict},
    scoring::{self, Scored, Scores},
};

/// A chunk conflict note surfaced alongside the final answer.
#[derive(Debug, Clone)]
pub struct ConflictNote {
    pub explanation: String,
    pub resolution: String,
}

/// Output of the hybrid search stage (§4.6), before any LLM call happens.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub candidates: Vec<Scored<Chunk>>,
    pub conflict: Option<ConflictNote>,
}

/// Steps 1-9 of the hybrid retrieval algorithm: parallel lexical + vector
/// search, min-max normalization, fused+boosted scoring, adjacency
/// expansion, and a conflict pre-check against the pre-expansion top two.
#[instrument(skip(db, openai_client, query_cache), fields(game_id))]
#[allow(clippy::too_many_arguments)]
pub async fn hybrid_search(
    db: &SurrealDbClient,
    openai_client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    query_cache: &QueryEmbeddingCache,
    config: &RetrievalConfig,
    query: &str,
    source_ids: &[String],
    enabled_expansion_ids: &[String],
) -> Result<RetrievalResult, AppError> {
    let tuning = &config.tuning;

    let embedding = match query_cache.get(query) {
        Some(cached) => cached,
        None => {
            let embedded = common::utils::embedding::embed_one(
                openai_client,
                &config.embedding_model,
                config.embedding_dimension,
                query,
            )
            .await?;
            query_cache.put(query.to_string(), embedded.clone());
            embedded
        }
    };

    let (fts_hits, vector_hits) = tokio::try_join!(
        Chunk::fts_search(query, source_ids, tuning.keyword_limit, db),
        Chunk::vector_search(
            &embedding,
            source_ids,
            tuning.vector_limit,
            tuning.min_vector_similarity,
            db,
        ),
    )?;

    let mut merged: HashMap<String, Scored<Chunk>> = HashMap::new();
    for hit in fts_hits {
        merged
            .entry(hit.chunk.get_id().to_owned())
            .or_insert_with(|| Scored::new(hit.chunk))
            .scores
            .fts = Some(hit.score);
    }
    for hit in vector_hits {
        merged
            .entry(hit.chunk.get_id().to_owned())
            .or_insert_with(|| Scored::new(hit.chunk))
            .scores
            .vector = Some(hit.score);
    }

    let ids: Vec<String> = merged.keys().cloned().collect();
    let fts_values: Vec<f32> =
        ids.iter().map(|id| merged[id].scores.fts.unwrap_or(0.0)).collect();
    let vector_values: Vec<f32> =
        ids.iter().map(|id| merged[id].scores.vector.unwrap_or(0.0)).collect();
    let fts_norm = scoring::min_max_normalize(&fts_values);
    let vector_norm = scoring::min_max_normalize(&vector_values);

    let mut candidates: Vec<Scored<Chunk>> = Vec::with_capacity(ids.len());
    for (idx, id) in ids.iter().enumerate() {
        let Some(mut scored) = merged.remove(id) else { continue };
        let normalized = Scores { fts: Some(fts_norm[idx]), vector: Some(vector_norm[idx]) };
        let base = scoring::fuse_base(&normalized);
        let boost = scoring::precedence_boost(&scored.item, enabled_expansion_ids);
        scored.scores = normalized;
        scored.fused = base + boost;
        candidates.push(scored);
    }

    scoring::sort_by_fused_desc(&mut candidates);

    let conflict =
        check_conflict_if_tied(openai_client, &config.chat_model, query, &candidates).await?;

    candidates.truncate(tuning.final_limit);
    let expanded = expand_adjacency(candidates, tuning.expand_top_k, db).await?;

    info!(candidates = expanded.len(), conflict = conflict.is_some(), "hybrid search complete");

    Ok(RetrievalResult { candidates: expanded, conflict })
}

async fn check_conflict_if_tied(
    openai_client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    query: &str,
    candidates: &[Scored<Chunk>],
) -> Result<Option<ConflictNote>, AppError> {
    let (Some(top), Some(next)) = (candidates.first(), candidates.get(1)) else {
        return Ok(None);
    };

    if !conflict::is_tie_with_different_precedence(
        (top.fused, top.item.precedence_level),
        (next.fused, next.item.precedence_level),
    ) {
        return Ok(None);
    }

    let ConflictVerdict { is_conflict, explanation, resolution } =
        conflict::check_top_chunks_for_conflict(openai_client, model, query, &top.item, &next.item)
            .await?;

    if !is_conflict {
        return Ok(None);
    }
    Ok(Some(ConflictNote { explanation, resolution }))
}

/// For each of the top `expand_top_k` candidates, pulls in `(source_id,
/// chunk_index ± 1)` neighbors if they already sit in the wider candidate
/// set, preserving `[prev, chunk, next]` order and de-duplicating.
async fn expand_adjacency(
    candidates: Vec<Scored<Chunk>>,
    expand_top_k: usize,
    db: &SurrealDbClient,
) -> Result<Vec<Scored<Chunk>>, AppError> {
    let present_ids: std::collections::HashSet<String> =
        candidates.iter().map(|c| c.item.get_id().to_owned()).collect();
    let by_id: HashMap<String, usize> = candidates
        .iter()
        .enumerate()
        .map(|(idx, c)| (c.item.get_id().to_owned(), idx))
        .collect();

    let mut expanded: Vec<Scored<Chunk>> = Vec::with_capacity(candidates.len());
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for (idx, candidate) in candidates.iter().enumerate() {
        let neighbors = if idx < expand_top_k {
            Some(Chunk::adjacent(&candidate.item.source_id, candidate.item.chunk_index, db).await?)
        } else {
            None
        };

        if let Some((Some(prev_chunk), _)) = &neighbors {
            if present_ids.contains(prev_chunk.id.as_str()) && seen.insert(prev_chunk.id.clone()) {
                if let Some(&prev_idx) = by_id.get(&prev_chunk.id) {
                    expanded.push(candidates[prev_idx].clone());
                }
            }
        }

        if seen.insert(candidate.item.get_id().to_owned()) {
            expanded.push(candidate.clone());
        }

        if let Some((_, Some(next_chunk))) = &neighbors {
            if present_ids.contains(next_chunk.id.as_str()) && seen.insert(next_chunk.id.clone()) {
                if let Some(&next_idx) = by_id.get(&next_chunk.id) {
                    expanded.push(candidates[next_idx].clone());
                }
            }
        }
    }

    Ok(expanded)
}

/// Final verdict returned by the full answer pipeline, ready for HTTP
/// serialization.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub verdict: String,
    pub confidence: ConfidenceLevel,
    pub confidence_reason: String,
    pub citations: Vec<Citation>,
    pub superseded_rule: Option<SupersededRule>,
    pub conflict_note: Option<String>,
    pub notes: Vec<String>,
    pub model_used: String,
}

#[derive(Debug, Clone)]
pub struct SupersededRule {
    pub quote: String,
    pub page: i64,
    pub reason: String,
    pub confidence: f64,
}

/// The full control flow from retrieved candidates to a verified answer:
/// generate (attempt 1) → verify → on failure regenerate strict (attempt 2)
/// → verify → on failure fall back to a quote-less response. Then computes
/// confidence and supersession surfacing.
#[instrument(skip(openai_client, db, retrieval), fields(game_name))]
#[allow(clippy::too_many_arguments)]
pub async fn answer_question(
    openai_client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    db: &SurrealDbClient,
    model: &str,
    game_name: &str,
    edition: Option<&str>,
    expansion_name_for_supersession: Option<&str>,
    question: &str,
    retrieval: &RetrievalResult,
) -> Result<AnswerOutcome, AppError> {
    let candidates: Vec<Chunk> = retrieval.candidates.iter().map(|s| s.item.clone()).collect();

    let conflict_present = retrieval.conflict.is_some();
    let s_top = retrieval.candidates.first().map_or(0.0, |c| c.fused);
    let s_next = retrieval.candidates.get(1).map_or(0.0, |c| c.fused);

    let attempt1 = answer_generator::generate_answer(
        openai_client, model, game_name, edition, question, &candidates, false,
    )
    .await?;

    let verification = verify_payload(&attempt1, &candidates);

    let (final_payload, verified, verified_chunk_id) = if verification.verified {
        (attempt1, true, verification.chunk_id)
    } else {
        let attempt2 = answer_generator::generate_answer(
            openai_client, model, game_name, edition, question, &candidates, true,
        )
        .await?;
        let reverification = verify_payload(&attempt2, &candidates);
        if reverification.verified {
            (attempt2, true, reverification.chunk_id)
        } else {
            (attempt2, false, None)
        }
    };

    if !verified {
        let relevant = citation::get_relevant_sections(&candidates, 3);
        let mut notes = final_payload.notes.clone();
        notes.push("the exact quote could not be verified against the source text".to_string());
        return Ok(AnswerOutcome {
            verdict: final_payload.verdict,
            confidence: ConfidenceLevel::Low,
            confidence_reason: confidence::low_reason(false, conflict_present, s_top).to_string(),
            citations: relevant
                .into_iter()
                .map(|(quote, page)| Citation {
                    chunk_id: String::new(),
                    quote,
                    page,
                    verified: false,
                })
                .collect(),
            superseded_rule: None,
            conflict_note: retrieval.conflict.as_ref().map(|c| c.explanation.clone()),
            notes,
            model_used: model.to_string(),
        });
    }

    let (confidence_level, reason) =
        confidence::calculate_confidence(verified, s_top, s_next, conflict_present);

    let chunk_id = verified_chunk_id.unwrap_or_else(|| final_payload.quote_chunk_id.clone());
    let verified_chunk = candidates.iter().find(|c| c.id == chunk_id);

    let superseded_rule = match verified_chunk.and_then(|c| c.overrides_chunk_id.as_deref()) {
        Some(base_chunk_id) => {
            build_superseded_rule(
                db,
                base_chunk_id,
                expansion_name_for_supersession,
                verified_chunk.and_then(|c| c.override_confidence),
            )
            .await?
        }
        None => None,
    };

    Ok(AnswerOutcome {
        verdict: final_payload.verdict,
        confidence: match confidence_level {
            confidence::Confidence::High => ConfidenceLevel::High,
            confidence::Confidence::Medium => ConfidenceLevel::Medium,
            confidence::Confidence::Low => ConfidenceLevel::Low,
        },
        confidence_reason: reason.to_string(),
        citations: vec![Citation {
            chunk_id: chunk_id.clone(),
            quote: citation::normalize_for_display(&final_payload.quote_exact),
            page: final_payload.page,
            verified: true,
        }],
        superseded_rule,
        conflict_note: retrieval.conflict.as_ref().map(|c| c.explanation.clone()),
        notes: final_payload.notes,
        model_used: model.to_string(),
    })
}

struct VerificationResult {
    verified: bool,
    chunk_id: Option<String>,
}

fn verify_payload(payload: &RawAnswerPayload, candidates: &[Chunk]) -> VerificationResult {
    if payload.quote_exact.trim().is_empty() {
        return VerificationResult { verified: false, chunk_id: None };
    }
    let outcome = citation::verify_citation_in_any_chunk(
        &payload.quote_exact,
        &payload.quote_chunk_id,
        candidates,
    );
    VerificationResult { verified: outcome.verified, chunk_id: outcome.chunk_id }
}

async fn build_superseded_rule(
    db: &SurrealDbClient,
    base_chunk_id: &str,
    expansion_name: Option<&str>,
    override_confidence: Option<f64>,
) -> Result<Option<SupersededRule>, AppError> {
    let base_chunk = match Chunk::get_by_id(base_chunk_id, db).await {
        Ok(chunk) => chunk,
        Err(AppError::NotFound(_)) => return Ok(None),
        Err(err) => return Err(err),
    };

    let expansion_label = expansion_name.unwrap_or("this expansion");
    let quote: String = base_chunk.chunk_text.chars().take(300).collect();

    Ok(Some(SupersededRule {
        quote: citation::normalize_for_display(&quote),
        page: base_chunk.page_number,
        reason: format!("{expansion_label} supersedes this base rule"),
        confidence: override_confidence.unwrap_or(0.0),
    }))
}
