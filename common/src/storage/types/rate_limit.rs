use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::{error::AppError, storage::db::SurrealDbClient};

/// Outcome of a sliding-window check, carrying everything `/ask` and
/// `/ingest` need to fill in `X-RateLimit-*` and `Retry-After` (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: i64,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// Check-and-record a single hit for `(endpoint, identifier)` against a
/// sliding window of `window` seconds and `limit` requests, atomically
/// pruning expired hits, counting the survivors, and appending the new hit
/// only if still under the limit (spec.md §4.10). SurrealDB's transaction
/// stands in for the original's Redis pipeline, since `CACHE_URL` here
/// points at the same store used for everything else.
pub async fn check_and_record(
    db: &SurrealDbClient,
    endpoint: &str,
    identifier: &str,
    window: Duration,
    limit: i64,
) -> Result<RateLimitDecision, AppError> {
    let bucket = format!("{endpoint}:{identifier}");
    let now = Utc::now();
    let cutoff = now - window;

    #[derive(Deserialize)]
    struct Outcome {
        count: i64,
        admitted: bool,
        oldest: Option<surrealdb::sql::Datetime>,
    }

    let mut result = db
        .query(
            "BEGIN TRANSACTION; \
             DELETE rate_limit_hit WHERE bucket = $bucket AND created_at < $cutoff; \
             LET $existing = (SELECT count() AS c FROM rate_limit_hit WHERE bucket = $bucket GROUP ALL); \
             LET $count = IF $existing != NONE THEN $existing[0].c ELSE 0 END; \
             LET $admitted = $count < $limit; \
             IF $admitted THEN (CREATE rate_limit_hit SET bucket = $bucket, created_at = time::now()) END; \
             LET $oldest_row = (SELECT created_at FROM rate_limit_hit WHERE bucket = $bucket ORDER BY created_at ASC LIMIT 1); \
             RETURN { \
                 count: $count, \
                 admitted: $admitted, \
                 oldest: IF $oldest_row != NONE THEN $oldest_row[0].created_at ELSE NONE END \
             }; \
             COMMIT TRANSACTION;",
        )
        .bind(("bucket", bucket))
        .bind(("cutoff", cutoff))
        .bind(("limit", limit))
        .await?
        .check()?;

    let rows: Vec<Outcome> = result.take(0)?;
    let outcome = rows
        .into_iter()
        .next()
        .ok_or_else(|| AppError::InternalError("rate limit check returned no rows".into()))?;

    let oldest: Option<DateTime<Utc>> = outcome.oldest.map(DateTime::<Utc>::from);
    let reset_at = oldest.map(|dt| dt + window).unwrap_or(now + window);
    let effective_count = if outcome.admitted {
        outcome.count + 1
    } else {
        outcome.count
    };

    Ok(RateLimitDecision {
        allowed: outcome.admitted,
        limit,
        remaining: (limit - effective_count).max(0),
        reset_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_requests_under_the_limit() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        for _ in 0..3 {
            let decision = check_and_record(&db, "ask", "1.2.3.4", Duration::seconds(60), 3)
                .await
                .expect("check");
            assert!(decision.allowed);
        }
        let decision = check_and_record(&db, "ask", "1.2.3.4", Duration::seconds(60), 3)
            .await
            .expect("check");
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn buckets_are_isolated_by_endpoint_and_identifier() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        for _ in 0..2 {
            check_and_record(&db, "ask", "client-a", Duration::seconds(60), 2)
                .await
                .expect("check");
        }
        let other_client = check_and_record(&db, "ask", "client-b", Duration::seconds(60), 2)
            .await
            .expect("check");
        assert!(other_client.allowed);
        let other_endpoint = check_and_record(&db, "ingest", "client-a", Duration::seconds(60), 2)
            .await
            .expect("check");
        assert!(other_endpoint.allowed);
    }

    #[tokio::test]
    async fn expired_hits_free_up_the_window() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        check_and_record(&db, "ask", "client-a", Duration::milliseconds(50), 1)
            .await
            .expect("check");
        let immediate = check_and_record(&db, "ask", "client-a", Duration::milliseconds(50), 1)
            .await
            .expect("check");
        assert!(!immediate.allowed);

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        let after_expiry = check_and_record(&db, "ask", "client-a", Duration::milliseconds(50), 1)
            .await
            .expect("check");
        assert!(after_expiry.allowed);
    }
}
