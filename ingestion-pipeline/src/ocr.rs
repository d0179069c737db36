//! PDF text extraction: a fast native-text path with a quality gate, falling
//! back to per-page vision-LLM transcription when the text layer is missing
//! or too noisy (scanned rulebooks are common in this corpus).

use std::path::Path;

use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use headless_chrome::{protocol::cdp::Page, Browser};
use tracing::{debug, warn};

use common::error::AppError;

const MIN_CHARS_PER_PAGE: usize = 50;
const MIN_SPARSE_PAGES: usize = 3;
const MIN_TOTAL_CHARS: usize = 100;
const PDF_MARKDOWN_PROMPT: &str = "Convert this PDF page to clean Markdown. Preserve headings, \
lists, tables, blockquotes, code fences, and inline formatting. Avoid commentary, and do NOT \
wrap the response in a Markdown code block.";
const PDF_MARKDOWN_PROMPT_RETRY: &str = "You must transcribe the provided PDF page image into \
accurate Markdown. The image is already supplied, so do not respond that you cannot view it.";
const MAX_VISION_ATTEMPTS: usize = 2;

/// Per-page extraction results from the native text layer, indexed by page
/// number starting at 1.
pub fn extract_native_pages(pdf_bytes: &[u8]) -> Result<Vec<String>, AppError> {
    pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        .map_err(|err| AppError::Processing(format!("failed to extract PDF text: {err}")))
}

/// The gate spec names: text quality is insufficient for chunking when at
/// least `MIN_SPARSE_PAGES` pages have fewer than `MIN_CHARS_PER_PAGE`
/// characters, or the whole document has fewer than `MIN_TOTAL_CHARS`.
pub fn needs_ocr(pages: &[String]) -> bool {
    let total_chars: usize = pages.iter().map(|p| p.trim().len()).sum();
    if total_chars < MIN_TOTAL_CHARS {
        return true;
    }
    let sparse_pages = pages.iter().filter(|p| p.trim().len() < MIN_CHARS_PER_PAGE).count();
    sparse_pages >= MIN_SPARSE_PAGES
}

/// Progress callback invoked after each OCR'd page: `(page, total, chars_so_far)`.
pub type OcrProgress<'a> = dyn FnMut(usize, usize, usize) + Send + 'a;

/// OCRs each page in `page_numbers` one at a time, dropping the rendered
/// image buffer before starting the next page so memory use stays bounded
/// regardless of document length. Requires OCR to be configured upstream
/// (`ocr_available`); callers that lack an OCR credential should surface
/// `AppError::NeedsOcr` before calling this.
pub async fn ocr_pages(
    file_path: &Path,
    page_numbers: &[u32],
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
    mut on_progress: Box<OcrProgress<'_>>,
) -> Result<Vec<(u32, String)>, AppError> {
    let file_url = url::Url::from_file_path(file_path)
        .map_err(|()| AppError::Processing("unable to construct PDF file URL".into()))?;

    let browser = Browser::default()
        .map_err(|err| AppError::Processing(format!("failed to start headless Chrome: {err}")))?;
    let tab = browser
        .new_tab()
        .map_err(|err| AppError::Processing(format!("failed to create Chrome tab: {err}")))?;
    tab.set_default_timeout(std::time::Duration::from_secs(10));

    let mut results = Vec::with_capacity(page_numbers.len());
    let mut chars_so_far = 0usize;

    for (idx, page) in page_numbers.iter().enumerate() {
        let target = format!("{file_url}#page={page}&toolbar=0&statusbar=0&zoom=page-fit");
        tab.navigate_to(&target)
            .map_err(|err| AppError::Processing(format!("failed to navigate to PDF page: {err}")))?
            .wait_until_navigated()
            .map_err(|err| AppError::Processing(format!("navigation to PDF page failed: {err}")))?;
        tab.wait_for_element("embed, canvas, body")
            .map_err(|err| AppError::Processing(format!("timed out waiting for PDF render: {err}")))?;

        let png = capture_page_png(&tab)?;
        debug!(page = *page, bytes = png.len(), "rendered PDF page for OCR");

        let markdown = transcribe_page(&png, client, model).await?;
        chars_so_far += markdown.len();
        on_progress(idx + 1, page_numbers.len(), chars_so_far);

        results.push((*page, markdown));
        // `png` drops here before the next iteration renders a new page.
    }

    Ok(results)
}

fn capture_page_png(tab: &headless_chrome::Tab) -> Result<Vec<u8>, AppError> {
    let screenshot = tab
        .call_method(Page::CaptureScreenshot {
            format: Some(Page::CaptureScreenshotFormatOption::Png),
            quality: None,
            clip: None,
            from_surface: Some(true),
            capture_beyond_viewport: Some(true),
            optimize_for_speed: Some(false),
        })
        .map_err(|err| AppError::Processing(format!("failed to capture PDF page: {err}")))?;

    STANDARD
        .decode(screenshot.data)
        .map_err(|err| AppError::Processing(format!("failed to decode PDF screenshot: {err}")))
}

async fn transcribe_page(
    png_bytes: &[u8],
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    model: &str,
) -> Result<String, AppError> {
    let encoded = STANDARD.encode(png_bytes);

    for attempt in 0..MAX_VISION_ATTEMPTS {
        let prompt = if attempt == 0 { PDF_MARKDOWN_PROMPT } else { PDF_MARKDOWN_PROMPT_RETRY };
        let image_url = format!("data:image/png;base64,{encoded}");

        let content_parts = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(prompt)
                .build()?
                .into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(
                    ImageUrlArgs::default()
                        .url(image_url)
                        .detail(ImageDetail::High)
                        .build()?,
                )
                .build()?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(content_parts)
                .build()?
                .into()])
            .build()?;

        let response = client.chat().create(request).await?;
        let Some(content) = response.choices.first().and_then(|c| c.message.content.as_ref())
        else {
            warn!(attempt, "vision response missing content");
            continue;
        };

        if is_low_quality_response(content) {
            warn!(attempt, "vision model returned low quality transcription");
            continue;
        }

        return Ok(content.trim().to_string());
    }

    Err(AppError::NeedsOcr(
        "vision model failed to transcribe PDF page after retries".into(),
    ))
}

fn is_low_quality_response(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lowered = trimmed.to_ascii_lowercase();
    lowered.contains("unable to") || lowered.contains("cannot view")
}
