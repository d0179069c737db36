use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub quote: String,
    pub page: i64,
    pub verified: bool,
}

stored_object!(AskHistory, "ask_history", {
    game_id: String,
    edition: Option<String>,
    expansions_used: Vec<String>,
    question: String,
    normalized_question: String,
    question_embedding: Option<Vec<f32>>,
    verdict: String,
    confidence: ConfidenceLevel,
    confidence_reason: String,
    citations: Vec<Citation>,
    response_time_ms: i64,
    model_used: String
});

impl AskHistory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        game_id: String,
        edition: Option<String>,
        expansions_used: Vec<String>,
        question: String,
        normalized_question: String,
        verdict: String,
        confidence: ConfidenceLevel,
        confidence_reason: String,
        citations: Vec<Citation>,
        response_time_ms: i64,
        model_used: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            game_id,
            edition,
            expansions_used,
            question,
            normalized_question,
            question_embedding: None,
            verdict,
            confidence,
            confidence_reason,
            citations,
            response_time_ms,
            model_used,
        }
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ask_history {id}")))
    }

    /// Delete rows older than `days_to_keep` (spec.md's ambient cleanup jobs).
    pub async fn delete_older_than(days_to_keep: i64, db: &SurrealDbClient) -> Result<u64, AppError> {
        let mut result = db
            .query(
                "LET $victims = (SELECT id FROM ask_history \
                 WHERE created_at < time::now() - duration::from::days($days)); \
                 DELETE ask_history WHERE created_at < time::now() - duration::from::days($days); \
                 RETURN $victims;",
            )
            .bind(("days", days_to_keep))
            .await?;

        #[derive(Deserialize)]
        struct Row {
            #[allow(dead_code)]
            id: String,
        }
        let rows: Vec<Row> = result.take(2)?;
        Ok(rows.len() as u64)
    }
}

/// Cache-key normalization: two questions differing only in case, surrounding
/// punctuation, or collapsible whitespace must hash identically (spec.md §8).
pub fn normalize_question(question: &str) -> String {
    let trimmed = question.trim().trim_matches(|c: char| c.is_ascii_punctuation());
    let collapsed: String = trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_question_is_case_and_whitespace_insensitive() {
        let a = normalize_question("Can a player take two actions?");
        let b = normalize_question("  can a player take   two actions  ");
        let c = normalize_question("CAN A PLAYER TAKE TWO ACTIONS");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[tokio::test]
    async fn delete_older_than_prunes_old_rows() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let mut old = AskHistory::new(
            "game-1".into(),
            None,
            vec![],
            "q".into(),
            "q".into(),
            "v".into(),
            ConfidenceLevel::High,
            "".into(),
            vec![],
            10,
            "test-model".into(),
        );
        old.created_at = chrono::Utc::now() - chrono::Duration::days(120);
        db.store_item(old).await.expect("store old");

        let fresh = AskHistory::new(
            "game-1".into(),
            None,
            vec![],
            "q2".into(),
            "q2".into(),
            "v".into(),
            ConfidenceLevel::High,
            "".into(),
            vec![],
            10,
            "test-model".into(),
        );
        db.store_item(fresh).await.expect("store fresh");

        let deleted = AskHistory::delete_older_than(90, &db).await.expect("cleanup");
        assert_eq!(deleted, 1);
    }
}
