//! Detects contradictions between the top two retrieval candidates when
//! their scores are nearly tied but their precedence levels differ.

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use common::{error::AppError, storage::types::chunk::Chunk};
use serde::Deserialize;
use serde_json::json;

const SCORE_TIE_THRESHOLD: f32 = 0.05;
const EXCERPT_CHARS: usize = 800;

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictVerdict {
    pub is_conflict: bool,
    pub explanation: String,
    pub resolution: String,
}

/// `true` iff the top two scores are within 0.05 of each other and they
/// carry different precedence levels.
pub fn is_tie_with_different_precedence(
    top: (f32, i64),
    next: (f32, i64),
) -> bool {
    (top.0 - next.0).abs() <= SCORE_TIE_THRESHOLD && top.1 != next.1
}

fn verdict_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "is_conflict": {"type": "boolean"},
            "explanation": {"type": "string"},
            "resolution": {"type": "string"}
        },
        "required": ["is_conflict", "explanation", "resolution"],
        "additionalProperties": false
    })
}

/// One LLM call asking whether `top`/`next` contradict each other on
/// `question`. Only invoked when [`is_tie_with_different_precedence`] holds.
pub async fn check_top_chunks_for_conflict(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    question: &str,
    top: &Chunk,
    next: &Chunk,
) -> Result<ConflictVerdict, AppError> {
    let top_text = truncate(&top.chunk_text, EXCERPT_CHARS);
    let next_text = truncate(&next.chunk_text, EXCERPT_CHARS);

    let prompt = format!(
        "Question: {question}\n\nEXCERPT A (page {}):\n{top_text}\n\n\
EXCERPT B (page {}):\n{next_text}\n\nDo these two excerpts contradict each other with respect \
to the question? Answer conservatively - only flag a genuine contradiction, not a difference in \
phrasing or scope.",
        top.page_number, next.page_number,
    );

    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Conflict verdict between two rule excerpts".into()),
            name: "conflict_verdict".into(),
            schema: Some(verdict_schema()),
            strict: Some(true),
        },
    };

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(0.0)
        .messages([
            ChatCompletionRequestSystemMessage::from(
                "You adjudicate contradictions between board game rule excerpts. Be \
conservative - prefer 'no conflict' when the excerpts merely cover different cases.",
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
        .ok_or_else(|| AppError::LLMParsing("no content in conflict verdict response".into()))?;

    serde_json::from_str(content)
        .map_err(|e| AppError::LLMParsing(format!("failed to parse conflict verdict: {e}")))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_within_threshold_and_different_precedence_triggers() {
        assert!(is_tie_with_different_precedence((0.82, 1), (0.79, 2)));
    }

    #[test]
    fn tie_with_same_precedence_does_not_trigger() {
        assert!(!is_tie_with_different_precedence((0.82, 1), (0.79, 1)));
    }

    #[test]
    fn gap_beyond_threshold_does_not_trigger() {
        assert!(!is_tie_with_different_precedence((0.90, 1), (0.50, 2)));
    }
}
