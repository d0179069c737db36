//! Cleanup and health-check jobs. External collaborators per spec.md §1:
//! invoked by a `main` binary subcommand or an external scheduler, not by an
//! in-process cron loop.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            ask_history::AskHistory,
            chunk::Chunk,
            source::Source,
            source_health::{HealthStatus, SourceHealth},
        },
    },
};

const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "The-Arbiter-HealthCheck/1.0";

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub affected_sources: usize,
}

/// Deletes expired chunks and flags their sources `needs_reingest` (spec.md §4.4).
pub async fn cleanup_expired_chunks(db: &SurrealDbClient) -> Result<CleanupReport, AppError> {
    let touched_sources = Chunk::delete_expired(db).await?;

    for source_id in &touched_sources {
        if let Err(err) = Source::mark_needs_reingest_by_id(source_id, db).await {
            warn!(%source_id, error = %err, "failed to flag source for re-ingestion");
        }
    }

    info!(
        affected_sources = touched_sources.len(),
        "expired chunk cleanup complete"
    );

    Ok(CleanupReport {
        affected_sources: touched_sources.len(),
    })
}

/// Prunes `ask_history` rows older than `days_to_keep` (default 90, spec.md §9).
pub async fn cleanup_old_history(days_to_keep: i64, db: &SurrealDbClient) -> Result<u64, AppError> {
    let deleted = AskHistory::delete_older_than(days_to_keep, db).await?;
    info!(deleted, days_to_keep, "history cleanup complete");
    Ok(deleted)
}

/// HEAD then conditional GET against a source's URL; records a
/// `SourceHealth` row and flags `needs_reingest` on a content-hash mismatch.
pub async fn check_source_health(
    source: &Source,
    http_client: &reqwest::Client,
    db: &SurrealDbClient,
) -> Result<SourceHealth, AppError> {
    let Some(url) = &source.source_url else {
        let health = SourceHealth::new(
            source.id.clone(),
            HealthStatus::Error,
            None,
            None,
            None,
            Some("no source URL configured".into()),
        );
        db.store_item(health.clone()).await?;
        return Ok(health);
    };

    let head = http_client
        .head(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(std::time::Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
        .send()
        .await;

    let health = match head {
        Ok(response) if response.status().is_success() => {
            let get = http_client
                .get(url)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .send()
                .await?;
            let bytes = get.bytes().await?;
            let content_length = bytes.len() as i64;
            let new_hash = format!("{:x}", Sha256::digest(&bytes));

            let status = if source.is_unchanged(&new_hash) {
                HealthStatus::Ok
            } else {
                HealthStatus::Changed
            };

            if matches!(status, HealthStatus::Changed) {
                Source::mark_needs_reingest_by_id(&source.id, db).await?;
                warn!(source_id = %source.id, "source content changed since last ingest");
            }

            SourceHealth::new(
                source.id.clone(),
                status,
                Some(i64::from(response.status().as_u16())),
                Some(new_hash),
                Some(content_length),
                None,
            )
        }
        Ok(response) => {
            let status_code = response.status().as_u16();
            let status = if matches!(status_code, 403 | 404 | 410) {
                HealthStatus::Unreachable
            } else {
                HealthStatus::Error
            };
            SourceHealth::new(
                source.id.clone(),
                status,
                Some(i64::from(status_code)),
                None,
                None,
                Some(format!("HTTP {status_code}")),
            )
        }
        Err(err) => {
            let status = if err.is_connect() || err.is_timeout() {
                HealthStatus::Unreachable
            } else {
                HealthStatus::Error
            };
            SourceHealth::new(source.id.clone(), status, None, None, None, Some(err.to_string()))
        }
    };

    db.store_item(health.clone()).await?;
    Ok(health)
}

pub async fn check_all_sources(
    http_client: &reqwest::Client,
    db: &SurrealDbClient,
) -> Result<Vec<SourceHealth>, AppError> {
    let mut results = Vec::new();
    let games = common::storage::types::game::Game::list_all(db).await?;
    for game in games {
        for source in Source::list_for_game(&game.id, db).await? {
            if source.source_url.is_some() {
                results.push(check_source_health(&source, http_client, db).await?);
            }
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_expired_chunks_flags_affected_sources() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let source = Source::new(
            "game-1".into(),
            None,
            "1st".into(),
            common::storage::types::source::SourceType::Rulebook,
            None,
        );
        db.store_item(source.clone()).await.expect("store source");

        let mut chunk = Chunk::new(
            source.id.clone(), "game-1".into(), None, 1, 0, None, "stale text".into(), 1,
        );
        chunk.expires_at = Some(chrono::Utc::now() - chrono::Duration::days(1));
        db.store_item(chunk).await.expect("store chunk");

        let report = cleanup_expired_chunks(&db).await.expect("cleanup");
        assert_eq!(report.affected_sources, 1);

        let refreshed = Source::get_by_id(&source.id, &db).await.expect("refetch");
        assert!(refreshed.needs_reingest);
    }
}
