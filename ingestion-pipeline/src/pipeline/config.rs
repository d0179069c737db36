/// Tuning knobs for the ingestion stage machine (spec.md §4.1/§4.3/§4.4).
#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_backoff_cap_exponent: u32,
    pub chunk_max_tokens: usize,
    pub chunk_overlap_fraction: f64,
    pub chunk_expiry_days: i64,
    pub embed_batch_size: usize,
    pub ocr_model: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub override_model: String,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 15 * 60,
            retry_backoff_cap_exponent: 5,
            chunk_max_tokens: crate::chunker::DEFAULT_MAX_TOKENS,
            chunk_overlap_fraction: crate::chunker::DEFAULT_OVERLAP_FRACTION,
            chunk_expiry_days: 30,
            embed_batch_size: 64,
            ocr_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            override_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}
