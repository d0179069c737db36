use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Chunk, "chunk", {
    source_id: String,
    game_id: String,
    expansion_id: Option<String>,
    page_number: i64,
    chunk_index: i64,
    section_title: Option<String>,
    chunk_text: String,
    embedding: Option<Vec<f32>>,
    precedence_level: i64,
    overrides_chunk_id: Option<String>,
    override_confidence: Option<f64>,
    override_evidence: Option<String>,
    phase_tags: Option<Vec<String>>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>
});

/// A lexical or vector search hit paired with its raw score, before fusion
/// normalization happens in `retrieval-pipeline::scoring`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

impl Chunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: String,
        game_id: String,
        expansion_id: Option<String>,
        page_number: i64,
        chunk_index: i64,
        section_title: Option<String>,
        chunk_text: String,
        precedence_level: i64,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id,
            game_id,
            expansion_id,
            page_number,
            chunk_index,
            section_title,
            chunk_text,
            embedding: None,
            precedence_level,
            overrides_chunk_id: None,
            override_confidence: None,
            override_evidence: None,
            phase_tags: None,
            expires_at: Some(now + chrono::Duration::days(30)),
        }
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chunk {id}")))
    }

    /// Per spec.md §4.4, a source's chunks are recreated whole on
    /// re-ingestion: delete everything for `source_id`, then bulk-insert the
    /// freshly chunked/embedded replacements, all inside one transaction. If
    /// any insert fails, the whole transaction rolls back and the source
    /// keeps its prior chunk set.
    pub async fn replace_for_source(
        source_id: &str,
        chunks: Vec<Chunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("BEGIN TRANSACTION; DELETE chunk WHERE source_id = $source_id; COMMIT TRANSACTION;")
            .bind(("source_id", source_id.to_string()))
            .await?
            .check()?;

        if chunks.is_empty() {
            return Ok(());
        }

        let mut query = db.client.query("BEGIN TRANSACTION;");
        for (idx, chunk) in chunks.iter().enumerate() {
            query = query
                .query(format!("CREATE chunk CONTENT $chunk_{idx};"))
                .bind((format!("chunk_{idx}"), chunk.clone()));
        }
        query.query("COMMIT TRANSACTION;").await?.check()?;

        Ok(())
    }

    pub async fn non_expired_for_sources(
        source_ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .query(
                "SELECT * FROM chunk WHERE source_id IN $source_ids \
                 AND (expires_at IS NONE OR expires_at > time::now())",
            )
            .bind(("source_ids", source_ids.to_vec()))
            .await?;
        Ok(result.take(0)?)
    }

    /// BM25 lexical ranking restricted to `source_ids`, non-expired chunks.
    pub async fn fts_search(
        query: &str,
        source_ids: &[String],
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let mut result = db
            .query(
                "SELECT *, search::score(1) AS score FROM chunk \
                 WHERE source_id IN $source_ids \
                 AND (expires_at IS NONE OR expires_at > time::now()) \
                 AND chunk_text @1@ $query \
                 ORDER BY score DESC LIMIT $limit",
            )
            .bind(("source_ids", source_ids.to_vec()))
            .bind(("query", query.to_string()))
            .bind(("limit", limit as i64))
            .await?;

        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            chunk: Chunk,
            score: f32,
        }
        let rows: Vec<Row> = result.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| ScoredChunk {
                chunk: r.chunk,
                score: r.score,
            })
            .collect())
    }

    /// Cosine similarity search with a minimum similarity floor (spec.md §4.6 step 2b).
    pub async fn vector_search(
        embedding: &[f32],
        source_ids: &[String],
        limit: usize,
        min_similarity: f32,
        db: &SurrealDbClient,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        let mut result = db
            .query(
                "SELECT *, vector::similarity::cosine(embedding, $embedding) AS score FROM chunk \
                 WHERE source_id IN $source_ids AND embedding IS NOT NONE \
                 AND (expires_at IS NONE OR expires_at > time::now()) \
                 AND vector::similarity::cosine(embedding, $embedding) >= $min_similarity \
                 ORDER BY score DESC LIMIT $limit",
            )
            .bind(("source_ids", source_ids.to_vec()))
            .bind(("embedding", embedding.to_vec()))
            .bind(("min_similarity", min_similarity))
            .bind(("limit", limit as i64))
            .await?;

        #[derive(Deserialize)]
        struct Row {
            #[serde(flatten)]
            chunk: Chunk,
            score: f32,
        }
        let rows: Vec<Row> = result.take(0)?;
        Ok(rows
            .into_iter()
            .map(|r| ScoredChunk {
                chunk: r.chunk,
                score: r.score,
            })
            .collect())
    }

    /// `(source_id, chunk_index ± 1)` neighbors, used for adjacency expansion
    /// (spec.md §4.6 step 8). Only returns neighbors that actually exist.
    pub async fn adjacent(
        source_id: &str,
        chunk_index: i64,
        db: &SurrealDbClient,
    ) -> Result<(Option<Self>, Option<Self>), AppError> {
        let mut result = db
            .query(
                "SELECT * FROM chunk WHERE source_id = $source_id AND chunk_index = $prev; \
                 SELECT * FROM chunk WHERE source_id = $source_id AND chunk_index = $next;",
            )
            .bind(("source_id", source_id.to_string()))
            .bind(("prev", chunk_index - 1))
            .bind(("next", chunk_index + 1))
            .await?;
        let prev: Vec<Self> = result.take(0)?;
        let next: Vec<Self> = result.take(1)?;
        Ok((prev.into_iter().next(), next.into_iter().next()))
    }

    /// Candidate base chunks for the override detector: same game, strictly
    /// lower precedence level, with a non-null embedding (spec.md §4.9).
    pub async fn base_candidates_for_game(
        game_id: &str,
        above_precedence: i64,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .query(
                "SELECT * FROM chunk WHERE game_id = $game_id \
                 AND precedence_level < $precedence AND embedding IS NOT NONE",
            )
            .bind(("game_id", game_id.to_string()))
            .bind(("precedence", above_precedence))
            .await?;
        Ok(result.take(0)?)
    }

    pub async fn set_override(
        &self,
        overrides_chunk_id: &str,
        confidence: f64,
        evidence: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE chunk SET overrides_chunk_id = $overrides, override_confidence = $conf, \
                 override_evidence = $evidence, updated_at = time::now() WHERE id = $id",
            )
            .bind(("overrides", overrides_chunk_id.to_string()))
            .bind(("conf", confidence))
            .bind(("evidence", evidence.to_string()))
            .bind(("id", surrealdb::sql::Thing::from(("chunk", self.id.as_str()))))
            .await?;
        Ok(())
    }

    /// Delete chunks with `expires_at <= now`; returns the distinct source
    /// ids touched so callers can flag them `needs_reingest`.
    pub async fn delete_expired(db: &SurrealDbClient) -> Result<Vec<String>, AppError> {
        let mut result = db
            .query(
                "LET $victims = (SELECT id, source_id FROM chunk WHERE expires_at <= time::now()); \
                 DELETE chunk WHERE expires_at <= time::now(); \
                 RETURN $victims;",
            )
            .await?;

        #[derive(Deserialize)]
        struct Victim {
            source_id: String,
        }
        let victims: Vec<Victim> = result.take(2)?;
        let mut source_ids: Vec<String> = victims.into_iter().map(|v| v.source_id).collect();
        source_ids.sort();
        source_ids.dedup();
        Ok(source_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(source_id: &str, idx: i64, text: &str) -> Chunk {
        Chunk::new(
            source_id.into(),
            "game-1".into(),
            None,
            1,
            idx,
            None,
            text.into(),
            1,
        )
    }

    #[tokio::test]
    async fn replace_for_source_is_delete_then_insert() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let first_gen = vec![sample("src-1", 0, "old text")];
        Chunk::replace_for_source("src-1", first_gen, &db)
            .await
            .expect("first replace");

        let second_gen = vec![sample("src-1", 0, "new text a"), sample("src-1", 1, "new text b")];
        Chunk::replace_for_source("src-1", second_gen, &db)
            .await
            .expect("second replace");

        let all = Chunk::non_expired_for_sources(&["src-1".into()], &db)
            .await
            .expect("query");
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|c| c.chunk_text.starts_with("new text")));
    }

    #[tokio::test]
    async fn is_expired_true_once_past_expiry() {
        let mut chunk = sample("src-1", 0, "text");
        chunk.expires_at = Some(chrono::Utc::now() - chrono::Duration::days(1));
        assert!(chunk.is_expired(chrono::Utc::now()));
    }

    #[tokio::test]
    async fn delete_expired_returns_touched_sources() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let mut expired = sample("src-1", 0, "stale");
        expired.expires_at = Some(chrono::Utc::now() - chrono::Duration::days(1));
        db.store_item(expired).await.expect("store expired");
        db.store_item(sample("src-2", 0, "fresh"))
            .await
            .expect("store fresh");

        let touched = Chunk::delete_expired(&db).await.expect("cleanup");
        assert_eq!(touched, vec!["src-1".to_string()]);

        let remaining = Chunk::non_expired_for_sources(
            &["src-1".into(), "src-2".into()],
            &db,
        )
        .await
        .expect("query");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_id, "src-2");
    }
}
