use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use common::{error::AppError, storage::db::SurrealDbClient, utils::config::AppConfig};
use retrieval_pipeline::{cache::QueryEmbeddingCache, RetrievalConfig};

/// Shared handler state for the `/api/v1` surface: the database pool,
/// configuration, an OpenAI client reused across requests, retrieval
/// tuning, and the process-local query-embedding memo (spec.md §9's
/// "explicit `Runtime` value passed to handlers", narrowed here to what the
/// API router itself needs rather than a process-wide singleton).
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub openai_client: OpenAIClient<OpenAIConfig>,
    pub retrieval_config: RetrievalConfig,
    pub query_cache: Arc<QueryEmbeddingCache>,
}

impl ApiState {
    pub async fn new(config: AppConfig) -> Result<Self, AppError> {
        let db = SurrealDbClient::new(
            &config.database_url,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?;
        db.ensure_initialized().await?;

        Self::with_db(Arc::new(db), config)
    }

    /// Builds state around an already-connected, already-initialized db
    /// handle, so `main`'s `server` binary can share one connection across
    /// `ApiState` and `html-router`'s `HtmlState`.
    pub fn with_db(db: Arc<SurrealDbClient>, config: AppConfig) -> Result<Self, AppError> {
        let openai_client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.llm_api_key)
                .with_api_base(&config.llm_api_base_url),
        );

        let retrieval_config = RetrievalConfig::new(
            config.embedding_model().to_string(),
            config.embedding_dimension as u32,
            config.chat_model().to_string(),
        );
        let ttl = Duration::from_secs(retrieval_config.tuning.query_embedding_cache_ttl_secs);

        Ok(Self {
            db,
            config,
            openai_client,
            retrieval_config,
            query_cache: Arc::new(QueryEmbeddingCache::new(ttl)),
        })
    }
}
