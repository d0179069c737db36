use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use common::{
    error::AppError,
    storage::types::{api_cost, rate_limit},
};

use crate::{api_state::ApiState, error::ApiError};

/// spec.md §4.10's per-endpoint limits. This workspace carries no
/// user-account/session concept (§1 non-goal), so the "per session" half of
/// `/ask`'s limit collapses onto the same client-IP identifier as the
/// per-minute bound; see DESIGN.md.
const ASK_LIMIT: i64 = 10;
const ASK_WINDOW_SECS: i64 = 60;
const INGEST_LIMIT: i64 = 3;
const INGEST_WINDOW_SECS: i64 = 3600;

fn client_identifier(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn enforce(
    state: &ApiState,
    endpoint: &str,
    identifier: &str,
    window: Duration,
    limit: i64,
) -> Result<(), ApiError> {
    match rate_limit::check_and_record(&state.db, endpoint, identifier, window, limit).await {
        Ok(decision) if decision.allowed => Ok(()),
        Ok(decision) => Err(ApiError::RateLimited {
            message: format!("rate limit exceeded for {endpoint}"),
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at: decision.reset_at.to_rfc3339(),
            retry_after_secs: (decision.reset_at - Utc::now()).num_seconds().max(1),
        }),
        Err(err) => {
            // Fail open on cache unavailability, matching spec.md §4.10.
            tracing::error!(error = %err, endpoint, "rate limiter unavailable, admitting request");
            Ok(())
        }
    }
}

pub async fn rate_limit_ask(
    State(state): State<ApiState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let identifier = client_identifier(&req);
    enforce(&state, "ask", &identifier, Duration::seconds(ASK_WINDOW_SECS), ASK_LIMIT).await?;
    Ok(next.run(req).await)
}

pub async fn rate_limit_ingest(
    State(state): State<ApiState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let identifier = client_identifier(&req);
    enforce(&state, "ingest", &identifier, Duration::seconds(INGEST_WINDOW_SECS), INGEST_LIMIT).await?;
    Ok(next.run(req).await)
}

/// Rejects with `ServiceUnavailable` once the trailing-24h spend reaches
/// `daily_budget_usd` (spec.md §4.10). Applied to both paid-call routes
/// (`/ask`, `/ingest`), layered alongside the rate limiter.
pub async fn budget_gate(
    State(state): State<ApiState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    match api_cost::check_budget(&state.db, state.config.daily_budget_usd).await {
        Ok(()) => Ok(next.run(req).await),
        Err(AppError::BudgetExceeded(retry_after)) => Err(ApiError::BudgetExceeded(retry_after)),
        Err(err) => {
            tracing::error!(error = %err, "budget gate check failed, admitting request");
            Ok(next.run(req).await)
        }
    }
}
