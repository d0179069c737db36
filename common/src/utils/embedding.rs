use async_openai::types::CreateEmbeddingRequestArgs;
use tracing::debug;

use crate::error::AppError;

/// Long inputs are truncated before submission (spec.md §4.2).
const MAX_EMBEDDING_CHARS: usize = 30_000;

pub fn truncate_for_embedding(text: &str) -> &str {
    match text.char_indices().nth(MAX_EMBEDDING_CHARS) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Batched dense-vector embedding generation, preserving input order and
/// length. Empty strings map to the zero vector without a round trip
/// (spec.md §4.2). Fails with `AppError::EmbeddingUnavailable` on transport
/// errors so callers can persist chunks with null embeddings instead of
/// aborting ingestion outright.
pub async fn embed_batch(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    dimensions: u32,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, AppError> {
    let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
    let mut pending_indices = Vec::new();
    let mut pending_inputs = Vec::new();

    for (idx, text) in texts.iter().enumerate() {
        if text.is_empty() {
            results[idx] = Some(vec![0.0; dimensions as usize]);
        } else {
            pending_indices.push(idx);
            pending_inputs.push(truncate_for_embedding(text).to_string());
        }
    }

    if !pending_inputs.is_empty() {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(dimensions)
            .input(pending_inputs.clone())
            .build()
            .map_err(|e| AppError::EmbeddingUnavailable(e.to_string()))?;

        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AppError::EmbeddingUnavailable(e.to_string()))?;

        if response.data.len() != pending_inputs.len() {
            return Err(AppError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                pending_inputs.len(),
                response.data.len()
            )));
        }

        let mut by_index = response.data;
        by_index.sort_by_key(|d| d.index);
        for (slot, data) in pending_indices.into_iter().zip(by_index.into_iter()) {
            results[slot] = Some(data.embedding);
        }
    }

    debug!(count = results.len(), "embedding batch complete");

    Ok(results.into_iter().map(Option::unwrap_or_default).collect())
}

/// Single-text convenience wrapper over [`embed_batch`], used for query
/// embeddings in the retrieval engine.
pub async fn embed_one(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    dimensions: u32,
    text: &str,
) -> Result<Vec<f32>, AppError> {
    let mut batch =
        embed_batch(client, model, dimensions, std::slice::from_ref(&text.to_string())).await?;
    Ok(batch.pop().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_for_embedding_respects_char_boundary() {
        let text = "a".repeat(MAX_EMBEDDING_CHARS + 500);
        let truncated = truncate_for_embedding(&text);
        assert_eq!(truncated.chars().count(), MAX_EMBEDDING_CHARS);
    }

    #[test]
    fn truncate_for_embedding_is_noop_for_short_text() {
        assert_eq!(truncate_for_embedding("short rule text"), "short rule text");
    }
}
