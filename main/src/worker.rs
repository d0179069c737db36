use std::sync::Arc;

use common::{storage::db::SurrealDbClient, storage::store::StorageManager, utils::config::get_config};
use ingestion_pipeline::{
    pipeline::{DefaultPipelineServices, IngestionConfig},
    run_worker_loop, IngestionPipeline,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = get_config()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(config.environment.default_log_level())
        }))
        .try_init()
        .ok();

    let db = Arc::new(
        SurrealDbClient::new(
            &config.database_url,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url),
    );

    let services = Arc::new(DefaultPipelineServices::new(
        reqwest::Client::new(),
        openai_client.clone(),
    ));

    let storage = Arc::new(StorageManager::new(&config).await?);

    let mut pipeline_config = IngestionConfig::default();
    pipeline_config.tuning.embedding_model = config.embedding_model().to_string();
    pipeline_config.tuning.embedding_dimension = config.embedding_dimension as u32;

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        services,
        pipeline_config,
        openai_client,
        storage,
    ));

    run_worker_loop(db, ingestion_pipeline).await
}
