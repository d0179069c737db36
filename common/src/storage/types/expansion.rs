use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Expansion, "expansion", {
    game_id: String,
    name: String,
    code: String,
    release_date: Option<chrono::DateTime<chrono::Utc>>,
    display_order: i64
});

impl Expansion {
    pub fn new(game_id: String, name: String, code: String, display_order: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            game_id,
            name,
            code,
            release_date: None,
            display_order,
        }
    }

    pub async fn get_by_id(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<Self>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("expansion {id}")))
    }

    pub async fn list_for_game(game_id: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .query("SELECT * FROM expansion WHERE game_id = $game_id ORDER BY display_order ASC")
            .bind(("game_id", game_id.to_string()))
            .await?;
        Ok(result.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_for_game_orders_by_display_order() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        let second = Expansion::new("game-1".into(), "Forgotten Circles".into(), "fc".into(), 1);
        let first = Expansion::new("game-1".into(), "Jaws of the Lion".into(), "jotl".into(), 0);
        db.store_item(second.clone()).await.expect("store");
        db.store_item(first.clone()).await.expect("store");

        let all = Expansion::list_for_game("game-1", &db).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].id, second.id);
    }
}
