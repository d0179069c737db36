use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager, types::job::Job, types::source::Source},
};
use tracing::error;

use super::{config::IngestionConfig, services::PipelineServices};
use crate::chunker::ChunkCandidate;

pub struct PipelineContext<'a> {
    pub job: &'a Job,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub storage: &'a StorageManager,

    pub source: Source,
    pub force: bool,
    pub pdf_bytes: Option<bytes::Bytes>,
    pub pages: Vec<String>,
    pub used_ocr: bool,
    pub chunk_candidates: Vec<(i64, ChunkCandidate)>,
    pub embeddings: Vec<Vec<f32>>,
}

impl<'a> PipelineContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: &'a Job,
        source: Source,
        force: bool,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
        storage: &'a StorageManager,
    ) -> Self {
        Self {
            job,
            db,
            pipeline_config,
            services,
            storage,
            source,
            force,
            pdf_bytes: None,
            pages: Vec::new(),
            used_ocr: false,
            chunk_candidates: Vec::new(),
            embeddings: Vec::new(),
        }
    }

    pub async fn report(&self, state: common::storage::types::job::JobState, pct: i64, message: &str) {
        if let Err(err) = self.job.update_progress(state, pct, message, self.db).await {
            error!(job_id = %self.job.id, error = %err, "failed to write job progress");
        }
    }

    pub fn abort(&self, err: AppError) -> AppError {
        error!(job_id = %self.job.id, source_id = %self.source.id, error = %err, "ingestion pipeline aborted");
        err
    }
}
