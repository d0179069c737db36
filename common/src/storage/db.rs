use crate::error::AppError;

use super::indexes::ensure_runtime_indexes;
use super::types::StoredObject;
use futures::Stream;
use std::{ops::Deref, sync::Arc};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Notification, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}
pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    /// Connect to a SurrealDB instance and select the working namespace/database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define the tables, constraints, and runtime (HNSW/FTS) indexes this
    /// service depends on. Safe to call on every boot; every statement is
    /// `IF NOT EXISTS`/idempotent.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        Self::build_schema(self).await?;
        ensure_runtime_indexes(self).await?;

        Ok(())
    }

    pub async fn build_schema(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE TABLE IF NOT EXISTS source SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_source_unique ON source \
                    FIELDS game_id, edition, source_type UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_source_game ON source FIELDS game_id;
                 DEFINE INDEX IF NOT EXISTS idx_game_slug ON game FIELDS slug UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_expansion_game ON expansion FIELDS game_id;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_source ON chunk FIELDS source_id, chunk_index;
                 DEFINE INDEX IF NOT EXISTS idx_chunk_expires ON chunk FIELDS expires_at;
                 DEFINE INDEX IF NOT EXISTS idx_job_state ON job FIELDS state;
                 DEFINE INDEX IF NOT EXISTS idx_job_kind ON job FIELDS kind;
                 DEFINE INDEX IF NOT EXISTS idx_source_health_source ON source_health FIELDS source_id;
                 DEFINE INDEX IF NOT EXISTS idx_ask_history_game ON ask_history FIELDS game_id;
                 DEFINE INDEX IF NOT EXISTS idx_api_cost_created ON api_cost FIELDS created_at;
                 DEFINE INDEX IF NOT EXISTS idx_rate_limit_bucket ON rate_limit_hit FIELDS bucket, created_at;
                 DEFINE INDEX IF NOT EXISTS idx_answer_cache_key ON answer_cache FIELDS cache_key;",
            )
            .await?;

        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result` - Vec<T> or Error
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to delete a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to delete
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The deleted item or Error
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    /// Operation to listen to a table for updates, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The deleted item or Error
    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, Error>>, Error>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        self.client.select(T::table_name()).live().await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing. Each call gets its
    /// own isolated namespace/database so tests never see one another's rows.
    pub async fn memory() -> Result<Self, Error> {
        let db = connect("mem://").await?;

        let database = uuid::Uuid::new_v4().to_string();
        db.use_ns("test").use_db(&database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use chrono::Utc;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let db = SurrealDbClient::memory()
            .await
            .expect("Failed to start in-memory surrealdb");

        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");

        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));

        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, Some(dummy));

        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_build_schema_is_idempotent() {
        let db = SurrealDbClient::memory()
            .await
            .expect("Failed to start in-memory surrealdb");

        db.build_schema().await.expect("first schema pass");
        db.build_schema().await.expect("second schema pass");
    }
}
