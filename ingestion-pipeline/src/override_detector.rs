//! Detects when an expansion's rules override a base game's rules. Runs once
//! per expansion ingestion (triggered as a `detect_overrides` job) to keep
//! LLM cost bounded: a cheap keyword gate and an embedding-similarity
//! pre-filter run before any model call.

use std::sync::LazyLock;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::chunk::Chunk},
};

pub const SIMILARITY_THRESHOLD: f32 = 0.82;
pub const MAX_CANDIDATES_PER_CHUNK: usize = 3;
pub const MIN_CONFIDENCE: i64 = 70;
const EXCERPT_CHARS: usize = 800;

#[allow(clippy::unwrap_used)]
static OVERRIDE_KEYWORDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(instead|replaces?|ignores?|supersedes?|overrides?|in place of|rather than|\
no longer|use this (rule|ability)|takes? precedence|now (you|players?|the)|changes? to)\b",
    )
    .unwrap()
});

pub fn has_override_keywords(text: &str) -> bool {
    OVERRIDE_KEYWORDS_RE.is_match(text)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Returns base chunks most similar to `expansion_chunk`, sorted descending
/// by cosine similarity, truncated to `MAX_CANDIDATES_PER_CHUNK`.
pub fn find_similar_base_chunks<'a>(
    expansion_chunk: &Chunk,
    base_chunks: &'a [Chunk],
) -> Vec<(&'a Chunk, f32)> {
    let Some(exp_embedding) = &expansion_chunk.embedding else {
        return Vec::new();
    };

    let mut similarities: Vec<(&Chunk, f32)> = base_chunks
        .iter()
        .filter_map(|base| {
            base.embedding.as_ref().map(|be| (base, cosine_similarity(exp_embedding, be)))
        })
        .collect();

    similarities.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    similarities.truncate(MAX_CANDIDATES_PER_CHUNK);
    similarities
}

#[derive(Debug, Deserialize)]
struct OverrideClassification {
    is_override: bool,
    confidence: i64,
    evidence_phrase: String,
}

fn classification_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "is_override": {"type": "boolean"},
            "confidence": {"type": "integer"},
            "evidence_phrase": {"type": "string"}
        },
        "required": ["is_override", "confidence", "evidence_phrase"],
        "additionalProperties": false
    })
}

/// One LLM call: does `expansion_chunk` override `base_chunk`? Conservative
/// by design — the system prompt instructs the model to require clear
/// evidence.
pub async fn classify_override(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    expansion_chunk: &Chunk,
    base_chunk: &Chunk,
) -> Result<(bool, i64, String), AppError> {
    let exp_text = truncate(&expansion_chunk.chunk_text, EXCERPT_CHARS);
    let base_text = truncate(&base_chunk.chunk_text, EXCERPT_CHARS);

    let prompt = format!(
        "Compare these two rule excerpts:\n\nBASE RULE (original game):\n{base_text}\n\n\
EXPANSION RULE (new content):\n{exp_text}\n\nQuestion: Does the expansion rule OVERRIDE/REPLACE \
the base rule? An override means the expansion rule changes how something works compared to the \
base rule."
    );

    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Override classification for a pair of rule excerpts".into()),
            name: "override_classification".into(),
            schema: Some(classification_schema()),
            strict: Some(true),
        },
    };

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(
                "You analyze board game rules to detect when expansion rules override base \
game rules. Be conservative - only mark as override if there's clear evidence.",
            )
            .into(),
            ChatCompletionRequestUserMessage::from(prompt).into(),
        ])
        .response_format(response_format)
        .build()?;

    let response = client.chat().create(request).await?;
    let content = response
        .choices
        .first()
        .and_then(|c| c.message.content.as_ref())
        .ok_or_else(|| AppError::LLMParsing("no content in override classification response".into()))?;

    let parsed: OverrideClassification = serde_json::from_str(content)
        .map_err(|e| AppError::LLMParsing(format!("failed to parse override classification: {e}")))?;

    let confidence = parsed.confidence.clamp(0, 100);
    let evidence = parsed.evidence_phrase.chars().take(200).collect();

    Ok((parsed.is_override, confidence, evidence))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Clone)]
pub struct OverrideRelationship {
    pub expansion_chunk_id: String,
    pub overrides_chunk_id: String,
    pub confidence: i64,
    pub evidence: String,
    pub similarity: f32,
}

/// Full cost-optimized override detection: keyword gate, then
/// embedding-similarity pre-filter, then a single LLM call against the best
/// candidate for each keyword-matching expansion chunk.
pub async fn detect_overrides(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    expansion_chunks: &[Chunk],
    base_chunks: &[Chunk],
) -> Result<Vec<OverrideRelationship>, AppError> {
    if expansion_chunks.is_empty() || base_chunks.is_empty() {
        return Ok(Vec::new());
    }

    let mut overrides = Vec::new();
    let mut keyword_matches = 0usize;
    let mut llm_calls = 0usize;

    info!(
        expansion_chunks = expansion_chunks.len(),
        base_chunks = base_chunks.len(),
        "detecting overrides"
    );

    for exp_chunk in expansion_chunks {
        if !has_override_keywords(&exp_chunk.chunk_text) {
            continue;
        }
        keyword_matches += 1;

        let candidates = find_similar_base_chunks(exp_chunk, base_chunks);
        let Some((best_base, similarity)) =
            candidates.into_iter().find(|(_, sim)| *sim >= SIMILARITY_THRESHOLD)
        else {
            continue;
        };

        llm_calls += 1;
        let (is_override, confidence, evidence) =
            classify_override(client, model, exp_chunk, best_base).await?;

        if is_override && confidence >= MIN_CONFIDENCE {
            debug!(
                expansion_chunk_id = %exp_chunk.id,
                base_chunk_id = %best_base.id,
                confidence,
                "override detected"
            );
            overrides.push(OverrideRelationship {
                expansion_chunk_id: exp_chunk.id.clone(),
                overrides_chunk_id: best_base.id.clone(),
                confidence,
                evidence,
                similarity,
            });
        }
    }

    info!(
        overrides = overrides.len(),
        keyword_matches, llm_calls, "override detection complete"
    );

    Ok(overrides)
}

/// Persists detected overrides onto their expansion chunks.
pub async fn save_override_relationships(
    overrides: &[OverrideRelationship],
    db: &SurrealDbClient,
) -> Result<usize, AppError> {
    let mut saved = 0;
    for rel in overrides {
        let outcome = async {
            let chunk = Chunk::get_by_id(&rel.expansion_chunk_id, db).await?;
            chunk
                .set_override(&rel.overrides_chunk_id, rel.confidence as f64, &rel.evidence, db)
                .await
        }
        .await;

        match outcome {
            Ok(()) => saved += 1,
            Err(err) => warn!(chunk_id = %rel.expansion_chunk_id, error = %err, "failed to save override"),
        }
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_override_keywords_matches_common_phrases() {
        assert!(has_override_keywords("This ability replaces the base game's rule."));
        assert!(has_override_keywords("Use this ability instead of the standard one."));
        assert!(!has_override_keywords("Players roll two dice each turn."));
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn find_similar_base_chunks_sorts_descending_and_truncates() {
        let mut exp = Chunk::new(
            "src-exp".into(), "game-1".into(), Some("exp-1".into()), 1, 0, None,
            "expansion text".into(), 2,
        );
        exp.embedding = Some(vec![1.0, 0.0]);

        let mut bases = Vec::new();
        for (i, vec) in [[1.0, 0.0], [0.0, 1.0], [0.7, 0.7], [0.9, 0.1]].into_iter().enumerate() {
            let mut c = Chunk::new(
                "src-base".into(), "game-1".into(), None, 1, i as i64, None,
                format!("base text {i}"), 1,
            );
            c.embedding = Some(vec.to_vec());
            bases.push(c);
        }

        let similar = find_similar_base_chunks(&exp, &bases);
        assert_eq!(similar.len(), MAX_CANDIDATES_PER_CHUNK);
        assert!(similar.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}
