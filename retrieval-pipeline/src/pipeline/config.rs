use serde::{Deserialize, Serialize};

/// Tunable parameters for the hybrid retrieval algorithm. The fusion weights
/// themselves live in `scoring` as fixed constants; these are the knobs that
/// only affect how many candidates are gathered and kept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalTuning {
    pub keyword_limit: usize,
    pub vector_limit: usize,
    pub final_limit: usize,
    pub expand_top_k: usize,
    pub min_vector_similarity: f32,
    pub query_embedding_cache_ttl_secs: u64,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            keyword_limit: 30,
            vector_limit: 30,
            final_limit: 12,
            expand_top_k: 5,
            min_vector_similarity: 0.3,
            query_embedding_cache_ttl_secs: 300,
        }
    }
}

/// Wrapper carrying tuning plus the model names used by this request's LLM
/// calls (answer generation, conflict adjudication).
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub chat_model: String,
}

impl RetrievalConfig {
    pub fn new(embedding_model: String, embedding_dimension: u32, chat_model: String) -> Self {
        Self {
            tuning: RetrievalTuning::default(),
            embedding_model,
            embedding_dimension,
            chat_model,
        }
    }

    pub fn with_tuning(mut self, tuning: RetrievalTuning) -> Self {
        self.tuning = tuning;
        self
    }
}
