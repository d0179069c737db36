use axum::{extract::State, response::IntoResponse, Json};
use common::{
    error::AppError,
    storage::types::{
        ask_history::AskHistory,
        feedback::{Feedback, FeedbackType},
    },
};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub ask_history_id: String,
    pub feedback_type: FeedbackType,
    pub selected_chunk_id: Option<String>,
    pub user_note: Option<String>,
}

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub feedback_id: String,
}

/// `POST /feedback` (spec.md §6).
pub async fn submit_feedback(
    State(state): State<ApiState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    AskHistory::get_by_id(&request.ask_history_id, &state.db).await?;

    let feedback = Feedback::new(
        request.ask_history_id,
        request.feedback_type,
        request.selected_chunk_id,
        request.user_note,
    );
    state
        .db
        .store_item(feedback.clone())
        .await
        .map_err(AppError::from)?;

    Ok(Json(FeedbackResponse { feedback_id: feedback.id }))
}
