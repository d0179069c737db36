use sha2::{Digest, Sha256};
use state_machines::core::GuardError;
use tracing::{debug, info, warn};

use common::{
    error::AppError,
    storage::types::{
        chunk::Chunk,
        job::{Job, JobKind, JobState},
        source::Source,
    },
};

use super::{
    context::PipelineContext,
    state::{Chunked, Downloaded, Embedded, Extracted, Fetched, IngestionMachine, Persisted},
};
use crate::{chunker, ocr};

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}

/// 5-30%: pulls the source bytes from its `source_url`.
pub async fn download(
    machine: IngestionMachine<(), Fetched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Downloaded>, AppError> {
    ctx.report(JobState::Downloading, 5, "downloading source").await;

    let url = ctx.source.source_url.clone().ok_or_else(|| {
        AppError::Validation(format!("source {} has no source_url", ctx.source.id))
    })?;

    let bytes = ctx.services.download(&url).await?;

    let file_hash = format!("{:x}", Sha256::digest(&bytes));
    if !ctx.force && ctx.source.is_unchanged(&file_hash) {
        info!(source_id = %ctx.source.id, "source unchanged; skipping re-ingestion");
        return Err(AppError::Validation("source unchanged, skipping".into()));
    }

    debug!(source_id = %ctx.source.id, bytes = bytes.len(), "downloaded source");
    ctx.pdf_bytes = Some(bytes);

    ctx.report(JobState::Downloading, 30, "download complete").await;

    machine.download().map_err(|(_, guard)| map_guard_error("download", &guard))
}

/// 30-50%: native-text extraction, falling into the 52-80% OCR branch when
/// the quality gate trips (spec.md §4.3/§4.4).
pub async fn extract(
    machine: IngestionMachine<(), Downloaded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    let bytes = ctx
        .pdf_bytes
        .clone()
        .ok_or_else(|| AppError::InternalError("pdf bytes missing at extract stage".into()))?;

    let native_pages = ocr::extract_native_pages(&bytes)?;
    ctx.report(JobState::Extracting, 50, "native text extracted").await;

    if ocr::needs_ocr(&native_pages) {
        let page_numbers: Vec<u32> = (1..=native_pages.len() as u32).collect();
        ctx.report(JobState::Ocr, 52, "starting ocr").await;

        let on_progress: Box<ocr::OcrProgress<'_>> = Box::new(|page, total, chars_so_far| {
            debug!(page, total, chars_so_far, "ocr page transcribed");
        });

        let model = ctx.pipeline_config.tuning.ocr_model.clone();
        let ocr_pages = ctx
            .services
            .ocr_pages(&bytes, &page_numbers, &model, on_progress)
            .await?;

        if ocr_pages.iter().all(|(_, text)| text.trim().is_empty()) {
            return Err(AppError::NeedsOcr(format!(
                "OCR produced no text for source {}",
                ctx.source.id
            )));
        }

        ctx.used_ocr = true;
        ctx.pages = ocr_pages.into_iter().map(|(_, text)| text).collect();
        ctx.report(JobState::Ocr, 80, "ocr complete").await;
    } else {
        ctx.pages = native_pages;
    }

    machine.extract().map_err(|(_, guard)| map_guard_error("extract", &guard))
}

/// 50-60% (native path) or 80-85% (post-OCR): sentence-aware chunking.
pub async fn chunk(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Chunked>, AppError> {
    let pages: Vec<(i64, String)> = ctx
        .pages
        .iter()
        .enumerate()
        .map(|(idx, text)| ((idx + 1) as i64, text.clone()))
        .collect();

    let tuning = &ctx.pipeline_config.tuning;
    ctx.chunk_candidates =
        chunker::chunk_document(&pages, tuning.chunk_max_tokens, tuning.chunk_overlap_fraction);

    let pct = if ctx.used_ocr { 85 } else { 60 };
    ctx.report(
        if ctx.used_ocr { JobState::Ocr } else { JobState::Chunking },
        pct,
        "chunking complete",
    )
    .await;

    debug!(
        source_id = %ctx.source.id,
        chunk_count = ctx.chunk_candidates.len(),
        "chunked source"
    );

    machine.chunk().map_err(|(_, guard)| map_guard_error("chunk", &guard))
}

/// 60-90% (native path) or 85-90% (post-OCR): embeds every chunk in one
/// batch call; embedding failures degrade to null vectors rather than
/// failing the job (spec.md's stage table).
pub async fn embed(
    machine: IngestionMachine<(), Chunked>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Embedded>, AppError> {
    let texts: Vec<String> = ctx
        .chunk_candidates
        .iter()
        .map(|(_, candidate)| candidate.chunk_text.clone())
        .collect();

    let tuning = &ctx.pipeline_config.tuning;
    let mut embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(tuning.embed_batch_size.max(1)) {
        match ctx
            .services
            .embed_batch(&tuning.embedding_model, tuning.embedding_dimension, batch)
            .await
        {
            Ok(batch_embeddings) => embeddings.extend(batch_embeddings),
            Err(err) => {
                warn!(source_id = %ctx.source.id, error = %err, "embedding batch failed; proceeding with null embeddings");
                embeddings.extend(std::iter::repeat(Vec::new()).take(batch.len()));
            }
        }
    }

    ctx.embeddings = embeddings;

    let pct = if ctx.used_ocr { 90 } else { 90 };
    ctx.report(JobState::Embedding, pct, "embedding complete").await;

    machine.embed().map_err(|(_, guard)| map_guard_error("embed", &guard))
}

/// 90-100%: delete-then-bulk-insert chunks for the source inside one
/// transaction, update the source row, and (for expansions) enqueue an
/// override-detection job.
pub async fn persist(
    machine: IngestionMachine<(), Embedded>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    let bytes = ctx
        .pdf_bytes
        .as_ref()
        .ok_or_else(|| AppError::InternalError("pdf bytes missing at persist stage".into()))?;
    let file_hash = format!("{:x}", Sha256::digest(bytes));

    let blob_location = format!("sources/{}/{}.pdf", ctx.source.id, file_hash);
    if let Err(err) = ctx.storage.put(&blob_location, bytes.clone()).await {
        warn!(source_id = %ctx.source.id, location = %blob_location, error = %err, "failed to archive source PDF bytes");
    }

    let precedence_level = ctx.source.source_type.precedence_level();
    let tuning = &ctx.pipeline_config.tuning;

    let mut chunks = Vec::with_capacity(ctx.chunk_candidates.len());
    for (idx, (page_number, candidate)) in ctx.chunk_candidates.iter().enumerate() {
        let mut chunk = Chunk::new(
            ctx.source.id.clone(),
            ctx.source.game_id.clone(),
            ctx.source.expansion_id.clone(),
            *page_number,
            candidate.chunk_index,
            None,
            candidate.chunk_text.clone(),
            precedence_level,
        );
        chunk.expires_at = Some(chrono::Utc::now() + chrono::Duration::days(tuning.chunk_expiry_days));
        if let Some(embedding) = ctx.embeddings.get(idx) {
            if !embedding.is_empty() {
                chunk.embedding = Some(embedding.clone());
            }
        }
        chunks.push(chunk);
    }

    let chunk_count = chunks.len();
    Chunk::replace_for_source(&ctx.source.id, chunks, ctx.db).await?;
    ctx.source.mark_ingested(file_hash, ctx.db).await?;

    if precedence_level == 2 {
        let job = Job::new(
            JobKind::DetectOverrides,
            serde_json::json!({ "source_id": ctx.source.id, "game_id": ctx.source.game_id }),
            300,
        );
        ctx.db.store_item(job).await?;
        info!(source_id = %ctx.source.id, "enqueued override-detection job for expansion source");
    }

    ctx.report(JobState::Saving, 100, "ingestion complete").await;

    info!(
        source_id = %ctx.source.id,
        job_id = %ctx.job.id,
        chunk_count,
        used_ocr = ctx.used_ocr,
        "ingestion pipeline persisted chunks"
    );

    machine.persist().map_err(|(_, guard)| map_guard_error("persist", &guard))
}
