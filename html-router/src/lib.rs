pub mod error;
pub mod html_state;
mod routes;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use html_state::HtmlState;
use tower_http::compression::CompressionLayer;

/// The operator-facing admin surface: list games/sources, trigger
/// re-ingestion, view a source's health log. Deliberately thin — no
/// business logic lives here, per the non-goal on dashboards/UI.
pub fn html_routes<S>(_app_state: &HtmlState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    HtmlState: FromRef<S>,
{
    Router::new()
        .route("/admin", get(routes::admin::dashboard))
        .route("/admin/games/{id}/sources", get(routes::admin::game_sources))
        .route("/admin/sources/{id}/reingest", post(routes::admin::reingest))
        .route("/admin/sources/{id}/health", get(routes::admin::source_health))
        .layer(CompressionLayer::new())
}
