use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Game, "game", {
    name: String,
    slug: String,
    external_id: Option<String>,
    cover_url: Option<String>
});

impl Game {
    pub fn new(name: String, slug: String, external_id: Option<String>, cover_url: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            name,
            slug,
            external_id,
            cover_url,
        }
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("game {id}")))
    }

    pub async fn get_by_slug(slug: &str, db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut result = db
            .query("SELECT * FROM game WHERE slug = $slug LIMIT 1")
            .bind(("slug", slug.to_string()))
            .await?;
        let games: Vec<Self> = result.take(0)?;
        Ok(games.into_iter().next())
    }

    pub async fn list_all(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        db.get_all_stored_items::<Self>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_fetch_by_slug() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let game = Game::new(
            "Gloomhaven".to_string(),
            "gloomhaven".to_string(),
            None,
            None,
        );
        db.store_item(game.clone()).await.expect("store game");

        let found = Game::get_by_slug("gloomhaven", &db)
            .await
            .expect("query ok")
            .expect("game present");
        assert_eq!(found.id, game.id);
        assert_eq!(found.name, "Gloomhaven");
    }

    #[tokio::test]
    async fn missing_slug_returns_none() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let found = Game::get_by_slug("nonexistent", &db).await.expect("query ok");
        assert!(found.is_none());
    }
}
