use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect},
};
use common::storage::types::{
    game::Game,
    job::{Job, JobKind},
    source::Source,
    source_health::SourceHealth,
};

use crate::{error::AdminError, html_state::HtmlState};

/// `GET /admin` — lists games (spec.md's thin admin CRUD surface).
pub async fn dashboard(State(state): State<HtmlState>) -> Result<impl IntoResponse, AdminError> {
    let games = Game::list_all(&state.db).await?;
    let template = state.templates.get_template("dashboard.html")?;
    let rendered = template.render(minijinja::context! { games })?;
    Ok(Html(rendered))
}

/// `GET /admin/games/{id}/sources` — lists a game's sources with re-ingest
/// and health-log actions.
pub async fn game_sources(
    State(state): State<HtmlState>,
    Path(game_id): Path<String>,
) -> Result<impl IntoResponse, AdminError> {
    let game = Game::get_by_id(&game_id, &state.db).await?;
    let sources = Source::list_for_game(&game_id, &state.db).await?;
    let template = state.templates.get_template("game_sources.html")?;
    let rendered = template.render(minijinja::context! { game, sources })?;
    Ok(Html(rendered))
}

/// `POST /admin/sources/{id}/reingest` — enqueues an `IngestSource` job with
/// `force: true`, mirroring `api-router`'s `/ingest` handler but operator-
/// triggered rather than API-triggered.
pub async fn reingest(
    State(state): State<HtmlState>,
    Path(source_id): Path<String>,
) -> Result<impl IntoResponse, AdminError> {
    let source = Source::get_by_id(&source_id, &state.db).await?;

    let job = Job::new(
        JobKind::IngestSource,
        serde_json::json!({ "source_id": source.id, "force": true }),
        900,
    );
    state
        .db
        .store_item(job)
        .await
        .map_err(common::error::AppError::from)?;

    Ok(Redirect::to(&format!("/admin/games/{}/sources", source.game_id)))
}

/// `GET /admin/sources/{id}/health` — the append-only health-check log.
pub async fn source_health(
    State(state): State<HtmlState>,
    Path(source_id): Path<String>,
) -> Result<impl IntoResponse, AdminError> {
    Source::get_by_id(&source_id, &state.db).await?;
    let checks = SourceHealth::list_for_source(&source_id, &state.db).await?;
    let template = state.templates.get_template("source_health.html")?;
    let rendered = template.render(minijinja::context! { source_id, checks })?;
    Ok(Html(rendered))
}
