use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use middleware_rate_limit::{budget_gate, rate_limit_ask, rate_limit_ingest};
use routes::{
    ask::ask,
    feedback::submit_feedback,
    games::{get_game, list_expansions, list_games},
    ingest::{ingest_events, ingest_status, trigger_ingest},
    liveness::live,
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod middleware_rate_limit;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes) plus the
    // read-only catalog (spec.md §6).
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/games", get(list_games))
        .route("/games/{id}", get(get_game))
        .route("/games/{id}/expansions", get(list_expansions))
        .route("/feedback", post(submit_feedback));

    // `/ask` carries its own rate limit (10/min per client) and the shared
    // budget gate.
    let ask_routes = Router::new()
        .route("/ask", post(ask))
        .route_layer(from_fn_with_state(app_state.clone(), budget_gate))
        .route_layer(from_fn_with_state(app_state.clone(), rate_limit_ask));

    // `/ingest` and its status/events sub-routes carry the ingest rate limit
    // (3/hour per client) and the budget gate; the request body limit guards
    // against oversized payloads per spec.md §6.
    let ingest_routes = Router::new()
        .route(
            "/ingest",
            post(trigger_ingest)
                .layer(DefaultBodyLimit::max(app_state.config.ingest_max_body_bytes)),
        )
        .route("/ingest/{job_id}/status", get(ingest_status))
        .route("/ingest/{job_id}/events", get(ingest_events))
        .route_layer(from_fn_with_state(app_state.clone(), budget_gate))
        .route_layer(from_fn_with_state(app_state.clone(), rate_limit_ingest));

    public.merge(ask_routes).merge(ingest_routes)
}
