mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            chunk::Chunk,
            job::{Job, JobKind, JobState},
            source::Source,
        },
    },
};
use serde::Deserialize;
use tracing::{info, warn};

use self::{context::PipelineContext, state::fetched};

#[derive(Debug, Deserialize)]
struct IngestJobArgs {
    source_id: String,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct DetectOverridesJobArgs {
    source_id: String,
    game_id: String,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
    openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
    storage: Arc<StorageManager>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        services: Arc<dyn PipelineServices>,
        pipeline_config: IngestionConfig,
        openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
            openai_client,
            storage,
        }
    }

    /// Dispatches a queued job to the ingestion drive or the override
    /// detector based on its kind (spec.md §4.4/§4.9 share one job table).
    #[tracing::instrument(skip_all, fields(job_id = %job.id))]
    pub async fn process_job(&self, job: &Job) -> Result<(), AppError> {
        match job.kind {
            JobKind::IngestSource => self.process_ingest_job(job).await,
            JobKind::DetectOverrides => self.process_detect_overrides_job(job).await,
        }
    }

    /// Drives a single `IngestSource` job through fetch → download → extract
    /// → (ocr) → chunk → embed → persist (spec.md §4.4). Job-level failure
    /// handling (retry/dead-letter) belongs to the caller (`run_worker_loop`).
    async fn process_ingest_job(&self, job: &Job) -> Result<(), AppError> {
        let args: IngestJobArgs = serde_json::from_value(job.args.clone())
            .map_err(|err| AppError::Validation(format!("invalid ingest job args: {err}")))?;

        job.update_progress(JobState::Queued, 0, "fetching source record", &self.db)
            .await?;

        let source = Source::get_by_id(&args.source_id, &self.db).await.map_err(|err| {
            warn!(source_id = %args.source_id, error = %err, "source not found for ingestion job");
            err
        })?;

        let mut ctx = PipelineContext::new(
            job,
            source,
            args.force,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
            self.storage.as_ref(),
        );

        let started = std::time::Instant::now();
        let result = self.drive(&mut ctx).await;

        match &result {
            Ok(()) => {
                info!(
                    job_id = %job.id,
                    source_id = %ctx.source.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "ingestion job finished"
                );
            }
            Err(err) => {
                warn!(job_id = %job.id, source_id = %ctx.source.id, error = %err, "ingestion job failed");
            }
        }

        result
    }

    /// Runs the cost-bounded override detector for one freshly-ingested
    /// expansion against its game's base chunks (spec.md §4.9).
    async fn process_detect_overrides_job(&self, job: &Job) -> Result<(), AppError> {
        let args: DetectOverridesJobArgs = serde_json::from_value(job.args.clone())
            .map_err(|err| AppError::Validation(format!("invalid override job args: {err}")))?;

        job.update_progress(JobState::Queued, 0, "collecting chunks", &self.db).await?;

        let expansion_chunks =
            Chunk::non_expired_for_sources(&[args.source_id.clone()], &self.db).await?;
        let base_chunks =
            Chunk::base_candidates_for_game(&args.game_id, 2, &self.db).await?;

        job.update_progress(JobState::Embedding, 30, "classifying overrides", &self.db)
            .await?;

        let overrides = crate::override_detector::detect_overrides(
            &self.openai_client,
            &self.pipeline_config.tuning.override_model,
            &expansion_chunks,
            &base_chunks,
        )
        .await?;

        let saved = crate::override_detector::save_override_relationships(&overrides, &self.db).await?;

        job.update_progress(JobState::Saving, 100, "override detection complete", &self.db)
            .await?;

        info!(
            job_id = %job.id,
            source_id = %args.source_id,
            overrides_found = overrides.len(),
            overrides_saved = saved,
            "override detection job finished"
        );

        Ok(())
    }

    async fn drive(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let machine = fetched();

        let machine = stages::download(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::extract(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::chunk(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let machine = stages::embed(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let _machine = stages::persist(machine, ctx).await.map_err(|err| ctx.abort(err))?;

        Ok(())
    }
}
