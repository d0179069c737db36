use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(AnswerCacheEntry, "answer_cache", {
    cache_key: String,
    payload: Value,
    expires_at: DateTime<Utc>
});

/// Build the cache key spec.md §8 requires to be stable across
/// case/whitespace/punctuation variants and order-independent of which
/// expansions were enabled: `normalize_question` output plus game, edition,
/// and a sorted expansion id list.
pub fn cache_key(
    game_id: &str,
    edition: Option<&str>,
    expansion_ids: &[String],
    normalized_question: &str,
) -> String {
    let mut sorted_expansions = expansion_ids.to_vec();
    sorted_expansions.sort();
    format!(
        "{game_id}|{}|{}|{normalized_question}",
        edition.unwrap_or(""),
        sorted_expansions.join(",")
    )
}

impl AnswerCacheEntry {
    pub fn new(cache_key: String, payload: Value, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            cache_key,
            payload,
            expires_at: now + ttl,
        }
    }

    /// Look up a live (non-expired) cached answer by key. Expired rows are
    /// left for the cleanup job rather than deleted inline, mirroring
    /// `Chunk`'s lazy-expiry pattern.
    pub async fn get_live(cache_key: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut result = db
            .query(
                "SELECT * FROM answer_cache \
                 WHERE cache_key = $cache_key AND expires_at > time::now() \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("cache_key", cache_key.to_string()))
            .await?;
        let rows: Vec<Self> = result.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Replace any existing entry for `cache_key` with a fresh one, so a
    /// repeated write (e.g. a re-answered question after ingestion changed)
    /// doesn't leave stale duplicates behind.
    pub async fn put(
        cache_key: String,
        payload: Value,
        ttl: chrono::Duration,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        db.query("DELETE answer_cache WHERE cache_key = $cache_key;")
            .bind(("cache_key", cache_key.clone()))
            .await?
            .check()?;

        let entry = Self::new(cache_key, payload, ttl);
        db.store_item(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn delete_expired(db: &SurrealDbClient) -> Result<u64, AppError> {
        #[derive(Deserialize)]
        struct Row {
            #[allow(dead_code)]
            id: String,
        }
        let mut result = db
            .query(
                "LET $victims = (SELECT id FROM answer_cache WHERE expires_at <= time::now()); \
                 DELETE answer_cache WHERE expires_at <= time::now(); \
                 RETURN $victims;",
            )
            .await?;
        let rows: Vec<Row> = result.take(2)?;
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_live_round_trips() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let key = cache_key("game-1", Some("2nd"), &["exp-a".into()], "how many actions");
        AnswerCacheEntry::put(
            key.clone(),
            serde_json::json!({"verdict": "yes"}),
            chrono::Duration::minutes(5),
            &db,
        )
        .await
        .expect("put");

        let hit = AnswerCacheEntry::get_live(&key, &db)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(hit.payload["verdict"], "yes");
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let key = cache_key("game-1", None, &[], "question");
        let entry = AnswerCacheEntry::new(key.clone(), serde_json::json!({}), chrono::Duration::seconds(-1));
        db.store_item(entry).await.expect("store expired");

        let hit = AnswerCacheEntry::get_live(&key, &db).await.expect("get");
        assert!(hit.is_none());
    }

    #[test]
    fn cache_key_is_independent_of_expansion_order() {
        let a = cache_key("g1", Some("3rd"), &["e2".into(), "e1".into()], "q");
        let b = cache_key("g1", Some("3rd"), &["e1".into(), "e2".into()], "q");
        assert_eq!(a, b);
    }
}
