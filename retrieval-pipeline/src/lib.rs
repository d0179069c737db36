pub mod answer_generator;
pub mod cache;
pub mod citation;
pub mod confidence;
pub mod conflict;
pub mod levenshtein;
pub mod pipeline;
pub mod scoring;

pub use pipeline::{answer_question, hybrid_search, AnswerOutcome, RetrievalConfig, RetrievalResult, RetrievalTuning, SupersededRule};

#[cfg(test)]
mod tests {
    use common::storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes, types::chunk::Chunk};

    async fn setup_test_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory().await.expect("memory db");
        ensure_runtime_indexes(&db).await.expect("failed to build runtime indexes");
        db
    }

    #[tokio::test]
    async fn lexical_search_finds_chunks_by_keyword() {
        let db = setup_test_db().await;
        let chunk = Chunk::new(
            "src-1".into(),
            "game-1".into(),
            None,
            1,
            0,
            None,
            "each player takes two actions on their turn".into(),
            1,
        );
        db.store_item(chunk.clone()).await.expect("store chunk");

        let hits = Chunk::fts_search("two actions", &["src-1".to_string()], 30, &db)
            .await
            .expect("fts search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, chunk.id);
    }
}
