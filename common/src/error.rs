use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Core internal error taxonomy, shared by the API router, ingestion
/// pipeline, retrieval pipeline, and worker binaries.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Daily budget exhausted, resets {0}")]
    BudgetExceeded(String),
    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("Source needs OCR: {0}")]
    NeedsOcr(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// True for errors that should never escape a pipeline stage unannounced
    /// but also should never abort a request outright (recovered locally).
    pub fn is_corpus_failure(&self) -> bool {
        matches!(self, AppError::NeedsOcr(_))
    }
}
