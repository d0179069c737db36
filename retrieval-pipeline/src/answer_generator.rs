//! LLM answer generation, tolerant JSON extraction, and response validation.
//! Two system prompts are used: a normal one for the first attempt, and a
//! stricter verbatim-only one for the regeneration that follows a failed
//! citation verification.

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use common::{error::AppError, storage::types::chunk::Chunk};
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are a precise board-game rules arbiter. Only use the provided \
excerpts to answer; never invent rules. Quote the exact supporting text verbatim from a single \
chunk and name its chunk id.";

const STRICT_SYSTEM_PROMPT: &str = "You are a precise board-game rules arbiter. Your prior \
answer's quote could not be verified against the source text. Reproduce the supporting quote \
VERBATIM, character-for-character, from the excerpts below. If you cannot find an exact \
supporting passage, return an empty string for quote_exact rather than paraphrasing.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnswerPayload {
    pub verdict: String,
    pub quote_exact: String,
    pub quote_chunk_id: String,
    pub page: i64,
    pub source_type: String,
    pub confidence: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string"},
            "quote_exact": {"type": "string"},
            "quote_chunk_id": {"type": "string"},
            "page": {"type": "integer"},
            "source_type": {"type": "string"},
            "confidence": {"type": "string"},
            "notes": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["verdict", "quote_exact", "quote_chunk_id", "page", "source_type", "confidence", "notes"],
        "additionalProperties": false
    })
}

/// `[Chunk {id}] (Page {page}, precedence {level})` headers followed by
/// chunk text, in candidate order.
pub fn format_chunks_for_prompt(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| {
            format!(
                "[Chunk {}] (Page {}, precedence {})\n{}",
                c.id, c.page_number, c.precedence_level, c.chunk_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Three-stage tolerant JSON extraction: direct parse, then a fenced
/// ```json code block, then the character-level streaming parser.
pub fn parse_answer_json(content: &str) -> Result<RawAnswerPayload, AppError> {
    if let Ok(parsed) = serde_json::from_str::<RawAnswerPayload>(content.trim()) {
        return Ok(parsed);
    }

    if let Some(fenced) = extract_fenced_block(content) {
        if let Ok(parsed) = serde_json::from_str::<RawAnswerPayload>(&fenced) {
            return Ok(parsed);
        }
    }

    let value = json_stream_parser::parse_stream(content)
        .map_err(|e| AppError::LLMParsing(format!("unparseable answer JSON: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| AppError::LLMParsing(format!("answer JSON missing required fields: {e}")))
}

fn extract_fenced_block(content: &str) -> Option<String> {
    let start = content.find("```")?;
    let after_fence = &content[start + 3..];
    let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let end = after_fence.find("```")?;
    Some(after_fence[..end].trim().to_string())
}

/// Normalizes an unknown `confidence` string to `medium` and reassigns
/// `quote_chunk_id` to the first candidate (with a correction note) if the
/// model named a chunk outside the candidate set.
pub fn validate_and_fix_response(
    mut payload: RawAnswerPayload,
    candidate_ids: &[String],
) -> RawAnswerPayload {
    if !matches!(payload.confidence.as_str(), "high" | "medium" | "low") {
        payload.confidence = "medium".to_string();
    }

    if !payload.quote_chunk_id.is_empty() && !candidate_ids.contains(&payload.quote_chunk_id) {
        if let Some(first) = candidate_ids.first() {
            payload.quote_chunk_id = first.clone();
            payload.notes.push("quote_chunk_id reassigned to top candidate".to_string());
        }
    }

    payload
}

#[allow(clippy::too_many_arguments)]
pub async fn generate_answer(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    game_name: &str,
    edition: Option<&str>,
    question: &str,
    chunks: &[Chunk],
    strict: bool,
) -> Result<RawAnswerPayload, AppError> {
    let edition_clause = edition.map(|e| format!(" ({e} edition)")).unwrap_or_default();
    let user_prompt = format!(
        "Game: {game_name}{edition_clause}\n\nQuestion: {question}\n\nExcerpts:\n{}",
        format_chunks_for_prompt(chunks)
    );

    let system_prompt = if strict { STRICT_SYSTEM_PROMPT } else { SYSTEM_PROMPT };
    let temperature = if strict { 0.0 } else { 0.1 };

    let response_format = async_openai::types::ResponseFormat::JsonSchema {
        json_schema: async_openai::types::ResponseFormatJsonSchema {
            description: Some("Board game rules verdict".into()),
            name: "answer_payload".into(),
            schema: Some(response_schema()),
            strict: Some(true),
        },
    };

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(temperature)
        .messages([
            ChatCompletionRequestSystemMessage::from(system_prompt).into(),
            ChatCompletionRequestUserMessage::from(user_prompt).into(),
        ])
        .response_format(response_format)
        .build()?;

    let response = client.chat().create(request).await?;
    let content = response
        .choices
        .first()
        .and_then(|c| c.message.content.as_ref())
        .ok_or_else(|| AppError::LLMParsing("no content in answer generation response".into()))?;

    let candidate_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    let parsed = parse_answer_json(content)?;
    Ok(validate_and_fix_response(parsed, &candidate_ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        serde_json::json!({
            "verdict": "Yes, you may take two actions.",
            "quote_exact": "each player takes two actions per turn",
            "quote_chunk_id": "chunk-1",
            "page": 4,
            "source_type": "rulebook",
            "confidence": "high",
            "notes": []
        })
        .to_string()
    }

    #[test]
    fn parse_answer_json_direct_parse() {
        let parsed = parse_answer_json(&sample_json()).expect("parse");
        assert_eq!(parsed.quote_chunk_id, "chunk-1");
    }

    #[test]
    fn parse_answer_json_extracts_fenced_block() {
        let wrapped = format!("Here is the answer:\n```json\n{}\n```", sample_json());
        let parsed = parse_answer_json(&wrapped).expect("parse");
        assert_eq!(parsed.page, 4);
    }

    #[test]
    fn validate_and_fix_response_normalizes_unknown_confidence() {
        let mut raw: RawAnswerPayload = serde_json::from_str(&sample_json()).unwrap();
        raw.confidence = "super-high".to_string();
        let fixed = validate_and_fix_response(raw, &["chunk-1".to_string()]);
        assert_eq!(fixed.confidence, "medium");
    }

    #[test]
    fn validate_and_fix_response_reassigns_unknown_chunk_id() {
        let raw: RawAnswerPayload = serde_json::from_str(&sample_json()).unwrap();
        let fixed = validate_and_fix_response(raw, &["chunk-2".to_string()]);
        assert_eq!(fixed.quote_chunk_id, "chunk-2");
        assert!(fixed.notes.iter().any(|n| n.contains("reassigned")));
    }

    #[test]
    fn format_chunks_for_prompt_includes_chunk_headers() {
        let chunk = Chunk::new(
            "src".into(), "game-1".into(), None, 4, 0, None, "each player takes two actions".into(), 1,
        );
        let formatted = format_chunks_for_prompt(std::slice::from_ref(&chunk));
        assert!(formatted.contains(&format!("[Chunk {}]", chunk.id)));
        assert!(formatted.contains("Page 4"));
    }
}
