use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(ApiCost, "api_cost", {
    request_id: String,
    endpoint: String,
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
    cache_hit: bool
});

/// Per-million-token (input, output) USD rates. Unknown models conservatively
/// cost `0.0`, matching the original `cost_calculator`'s behavior (spec.md §9).
const PRICING_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("text-embedding-3-small", 0.02, 0.0),
    ("text-embedding-3-large", 0.13, 0.0),
];

pub fn calculate_cost_usd(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let Some(&(_, input_rate, output_rate)) =
        PRICING_TABLE.iter().find(|(name, _, _)| *name == model)
    else {
        return 0.0;
    };

    let input_cost = (input_tokens as f64 / 1_000_000.0) * input_rate;
    let output_cost = (output_tokens as f64 / 1_000_000.0) * output_rate;
    input_cost + output_cost
}

impl ApiCost {
    pub fn new(
        request_id: String,
        endpoint: String,
        model: String,
        input_tokens: i64,
        output_tokens: i64,
        cache_hit: bool,
    ) -> Self {
        let cost_usd = calculate_cost_usd(&model, input_tokens, output_tokens);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            request_id,
            endpoint,
            model,
            input_tokens,
            output_tokens,
            cost_usd,
            cache_hit,
        }
    }

    /// Sum of `cost_usd` in the trailing 24h, used by the budget gate
    /// (spec.md §4.10). Can be stale by the duration of one in-flight
    /// request — documented as acceptable in spec.md §9.
    pub async fn sum_last_24h(db: &SurrealDbClient) -> Result<f64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            total: Option<f64>,
        }
        let mut result = db
            .query(
                "SELECT math::sum(cost_usd) AS total FROM api_cost \
                 WHERE created_at > time::now() - 24h GROUP ALL",
            )
            .await?;
        let rows: Vec<Row> = result.take(0)?;
        Ok(rows.first().and_then(|r| r.total).unwrap_or(0.0))
    }
}

/// Next UTC midnight, formatted as the `retry_after` the budget gate and the
/// `503` response body advertise (spec.md §4.10, §6).
pub fn next_utc_midnight() -> String {
    let now = Utc::now();
    let tomorrow = now.date_naive().succ_opt().unwrap_or(now.date_naive());
    Utc.from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        .to_rfc3339()
}

/// Reject once the trailing-24h spend reaches `daily_budget_usd` (spec.md
/// §4.10). Callers treat this as a gate, not a hard stop: cost rows keep
/// accumulating from in-flight requests, so the sum can be briefly stale
/// (spec.md §9) — acceptable since the gate only needs to be eventually
/// accurate.
pub async fn check_budget(db: &SurrealDbClient, daily_budget_usd: f64) -> Result<(), AppError> {
    let spent = ApiCost::sum_last_24h(db).await?;
    if spent >= daily_budget_usd {
        return Err(AppError::BudgetExceeded(next_utc_midnight()));
    }
    Ok(())
}

#[cfg(test)]
mod budget_tests {
    use super::*;

    #[tokio::test]
    async fn budget_gate_rejects_once_ceiling_is_reached() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        db.store_item(ApiCost::new(
            "req-1".into(),
            "/ask".into(),
            "gpt-4o".into(),
            10_000_000,
            1_000_000,
            false,
        ))
        .await
        .expect("store");

        let err = check_budget(&db, 1.0).await.unwrap_err();
        assert!(matches!(err, AppError::BudgetExceeded(_)));
    }

    #[tokio::test]
    async fn budget_gate_admits_when_under_ceiling() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        check_budget(&db, 10.0).await.expect("under budget");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_costs_nothing() {
        assert_eq!(calculate_cost_usd("some-unlisted-model", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn known_model_computes_proportional_cost() {
        let cost = calculate_cost_usd("gpt-4o-mini", 1_000_000, 1_000_000);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sum_last_24h_aggregates_recent_rows() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        db.store_item(ApiCost::new(
            "req-1".into(),
            "/ask".into(),
            "gpt-4o-mini".into(),
            1000,
            200,
            false,
        ))
        .await
        .expect("store");
        db.store_item(ApiCost::new(
            "req-2".into(),
            "/ask".into(),
            "gpt-4o-mini".into(),
            2000,
            400,
            false,
        ))
        .await
        .expect("store");

        let total = ApiCost::sum_last_24h(&db).await.expect("sum");
        assert!(total > 0.0);
    }
}
