use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Authority class a source carries; drives `Chunk::precedence_level` at
/// ingestion time (spec.md §3, §4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Rulebook,
    Expansion,
    Faq,
    Errata,
    ReferenceCard,
}

impl SourceType {
    /// `1=base, 2=expansion, 3=errata/faq` per spec.md §3.
    pub fn precedence_level(self) -> i64 {
        match self {
            SourceType::Rulebook | SourceType::ReferenceCard => 1,
            SourceType::Expansion => 2,
            SourceType::Faq | SourceType::Errata => 3,
        }
    }
}

stored_object!(Source, "source", {
    game_id: String,
    expansion_id: Option<String>,
    edition: String,
    source_type: SourceType,
    source_url: Option<String>,
    file_hash: Option<String>,
    needs_ocr: bool,
    needs_reingest: bool,
    last_ingested_at: Option<chrono::DateTime<chrono::Utc>>
});

impl Source {
    pub fn new(
        game_id: String,
        expansion_id: Option<String>,
        edition: String,
        source_type: SourceType,
        source_url: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            game_id,
            expansion_id,
            edition,
            source_type,
            source_url,
            file_hash: None,
            needs_ocr: false,
            needs_reingest: false,
            last_ingested_at: None,
        }
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("source {id}")))
    }

    pub async fn list_for_game(game_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .query("SELECT * FROM source WHERE game_id = $game_id")
            .bind(("game_id", game_id.to_string()))
            .await?;
        Ok(result.take(0)?)
    }

    /// `(game_id, edition, source_type)` uniquely identifies a source (spec.md §3).
    pub async fn find_unique(
        game_id: &str,
        edition: &str,
        source_type: SourceType,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut result = db
            .query(
                "SELECT * FROM source WHERE game_id = $game_id AND edition = $edition \
                 AND source_type = $source_type LIMIT 1",
            )
            .bind(("game_id", game_id.to_string()))
            .bind(("edition", edition.to_string()))
            .bind(("source_type", source_type))
            .await?;
        let rows: Vec<Self> = result.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub fn is_unchanged(&self, new_file_hash: &str) -> bool {
        self.file_hash.as_deref() == Some(new_file_hash)
    }

    pub async fn mark_ingested(
        &self,
        file_hash: String,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE source SET file_hash = $hash, needs_ocr = false, \
                 needs_reingest = false, last_ingested_at = time::now(), \
                 updated_at = time::now() WHERE id = $id",
            )
            .bind(("hash", file_hash))
            .bind(("id", surrealdb::sql::Thing::from(("source", self.id.as_str()))))
            .await?;
        Ok(())
    }

    pub async fn mark_needs_ocr(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query("UPDATE source SET needs_ocr = true, updated_at = time::now() WHERE id = $id")
            .bind(("id", surrealdb::sql::Thing::from(("source", self.id.as_str()))))
            .await?;
        Ok(())
    }

    /// Flags a source for re-ingestion without touching its other fields;
    /// used by expired-chunk cleanup and source health checks.
    pub async fn mark_needs_reingest_by_id(id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE source SET needs_reingest = true, updated_at = time::now() WHERE id = $id",
            )
            .bind(("id", surrealdb::sql::Thing::from(("source", id))))
            .await?;
        Ok(())
    }

    pub async fn update_file_hash(
        id: &str,
        file_hash: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("UPDATE source SET file_hash = $hash, updated_at = time::now() WHERE id = $id")
            .bind(("hash", file_hash.to_string()))
            .bind(("id", surrealdb::sql::Thing::from(("source", id))))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_level_matches_spec_ordinals() {
        assert_eq!(SourceType::Rulebook.precedence_level(), 1);
        assert_eq!(SourceType::ReferenceCard.precedence_level(), 1);
        assert_eq!(SourceType::Expansion.precedence_level(), 2);
        assert_eq!(SourceType::Faq.precedence_level(), 3);
        assert_eq!(SourceType::Errata.precedence_level(), 3);
    }

    #[tokio::test]
    async fn find_unique_respects_the_composite_key() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let source = Source::new(
            "game-1".into(),
            None,
            "2nd".into(),
            SourceType::Rulebook,
            None,
        );
        db.store_item(source.clone()).await.expect("store");

        let found = Source::find_unique("game-1", "2nd", SourceType::Rulebook, &db)
            .await
            .expect("query ok")
            .expect("present");
        assert_eq!(found.id, source.id);

        let missing = Source::find_unique("game-1", "2nd", SourceType::Faq, &db)
            .await
            .expect("query ok");
        assert!(missing.is_none());
    }
}
