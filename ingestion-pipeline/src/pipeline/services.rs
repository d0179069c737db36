use async_trait::async_trait;
use bytes::Bytes;

use common::error::AppError;

use crate::ocr::OcrProgress;

/// Side effects the stage functions need, isolated behind a trait so stage
/// logic stays testable without a real HTTP/LLM/browser round trip.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn download(&self, url: &str) -> Result<Bytes, AppError>;

    async fn ocr_pages(
        &self,
        pdf_bytes: &[u8],
        page_numbers: &[u32],
        model: &str,
        on_progress: Box<OcrProgress<'_>>,
    ) -> Result<Vec<(u32, String)>, AppError>;

    async fn embed_batch(
        &self,
        model: &str,
        dimensions: u32,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, AppError>;
}

pub struct DefaultPipelineServices {
    http_client: reqwest::Client,
    openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
}

impl DefaultPipelineServices {
    pub fn new(
        http_client: reqwest::Client,
        openai_client: async_openai::Client<async_openai::config::OpenAIConfig>,
    ) -> Self {
        Self {
            http_client,
            openai_client,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn download(&self, url: &str) -> Result<Bytes, AppError> {
        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Processing(format!(
                "download failed with status {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?)
    }

    async fn ocr_pages(
        &self,
        pdf_bytes: &[u8],
        page_numbers: &[u32],
        model: &str,
        on_progress: Box<OcrProgress<'_>>,
    ) -> Result<Vec<(u32, String)>, AppError> {
        let tmp = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .map_err(|err| AppError::Processing(format!("failed to create temp file: {err}")))?;
        tokio::fs::write(tmp.path(), pdf_bytes)
            .await
            .map_err(|err| AppError::Processing(format!("failed to write temp PDF: {err}")))?;

        crate::ocr::ocr_pages(tmp.path(), page_numbers, &self.openai_client, model, on_progress).await
    }

    async fn embed_batch(
        &self,
        model: &str,
        dimensions: u32,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, AppError> {
        common::utils::embedding::embed_batch(&self.openai_client, model, dimensions, texts).await
    }
}
