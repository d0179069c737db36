use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Helpful,
    WrongQuote,
    WrongInterpretation,
    MissingContext,
    WrongSource,
}

stored_object!(Feedback, "feedback", {
    ask_history_id: String,
    feedback_type: FeedbackType,
    selected_chunk_id: Option<String>,
    user_note: Option<String>
});

impl Feedback {
    pub fn new(
        ask_history_id: String,
        feedback_type: FeedbackType,
        selected_chunk_id: Option<String>,
        user_note: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            ask_history_id,
            feedback_type,
            selected_chunk_id,
            user_note,
        }
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("feedback {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_and_fetch_feedback() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let feedback = Feedback::new(
            "history-1".into(),
            FeedbackType::WrongQuote,
            Some("chunk-1".into()),
            Some("the quote is from page 12, not 14".into()),
        );
        db.store_item(feedback.clone()).await.expect("store");

        let found = Feedback::get_by_id(&feedback.id, &db).await.expect("fetch");
        assert_eq!(found.feedback_type, FeedbackType::WrongQuote);
    }
}
