use axum::{extract::Path, extract::State, response::IntoResponse, Json};
use common::storage::types::{expansion::Expansion, game::Game};
use serde::Serialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Serialize)]
pub struct GameResponse {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub external_id: Option<String>,
    pub cover_url: Option<String>,
}

impl From<Game> for GameResponse {
    fn from(game: Game) -> Self {
        Self {
            id: game.id,
            name: game.name,
            slug: game.slug,
            external_id: game.external_id,
            cover_url: game.cover_url,
        }
    }
}

#[derive(Serialize)]
pub struct ExpansionResponse {
    pub id: String,
    pub game_id: String,
    pub name: String,
    pub code: String,
    pub display_order: i64,
}

impl From<Expansion> for ExpansionResponse {
    fn from(expansion: Expansion) -> Self {
        Self {
            id: expansion.id,
            game_id: expansion.game_id,
            name: expansion.name,
            code: expansion.code,
            display_order: expansion.display_order,
        }
    }
}

/// `GET /games` — read-only catalog (spec.md §6).
pub async fn list_games(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let games = Game::list_all(&state.db).await?;
    let response: Vec<GameResponse> = games.into_iter().map(Into::into).collect();
    Ok(Json(response))
}

/// `GET /games/{id}`.
pub async fn get_game(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let game = Game::get_by_id(&id, &state.db).await?;
    Ok(Json(GameResponse::from(game)))
}

/// `GET /games/{id}/expansions`.
pub async fn list_expansions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Confirms the game exists before listing, so an unknown game id
    // surfaces as 404 rather than an empty list.
    Game::get_by_id(&id, &state.db).await?;
    let expansions = Expansion::list_for_game(&id, &state.db).await?;
    let response: Vec<ExpansionResponse> = expansions.into_iter().map(Into::into).collect();
    Ok(Json(response))
}
