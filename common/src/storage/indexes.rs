use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{error::AppError, storage::db::SurrealDbClient};

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FTS_ANALYZER_NAME: &str = "app_en_fts_analyzer";
/// Fixed embedding dimension recommended by spec.md §4.2.
const EMBEDDING_DIMENSION: usize = 1536;

#[derive(Clone, Copy)]
struct HnswIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
    options: &'static str,
}

const fn hnsw_index_specs() -> [HnswIndexSpec; 2] {
    [
        HnswIndexSpec {
            index_name: "idx_chunk_embedding",
            table: "chunk",
            field: "embedding",
            options: "DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY",
        },
        HnswIndexSpec {
            index_name: "idx_ask_history_question_embedding",
            table: "ask_history",
            field: "question_embedding",
            options: "DIST COSINE TYPE F32 EFC 100 M 8 CONCURRENTLY",
        },
    ]
}

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
    analyzer: &'static str,
}

const fn fts_index_specs() -> [FtsIndexSpec; 2] {
    [
        FtsIndexSpec {
            index_name: "chunk_tsv_fts_idx",
            table: "chunk",
            field: "chunk_text",
            analyzer: FTS_ANALYZER_NAME,
        },
        FtsIndexSpec {
            index_name: "chunk_section_title_fts_idx",
            table: "chunk",
            field: "section_title",
            analyzer: FTS_ANALYZER_NAME,
        },
    ]
}

impl HnswIndexSpec {
    fn definition_if_not_exists(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
             FIELDS {field} HNSW DIMENSION {dimension} {options};",
            index = self.index_name,
            table = self.table,
            field = self.field,
            dimension = EMBEDDING_DIMENSION,
            options = self.options,
        )
    }
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
             FIELDS {field} SEARCH ANALYZER {analyzer} BM25 CONCURRENTLY;",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = self.analyzer,
        )
    }
}

/// Build runtime Surreal indexes (FTS on `chunk.chunk_text` and HNSW on the
/// two embedding columns). Idempotent: safe to call on every boot.
pub async fn ensure_runtime_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    ensure_runtime_indexes_inner(db)
        .await
        .map_err(|err| AppError::InternalError(err.to_string()))
}

/// Rebuild known FTS and HNSW indexes, skipping any that are not yet defined.
/// Used by the admin maintenance surface after a bulk re-ingestion.
pub async fn rebuild_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    rebuild_indexes_inner(db)
        .await
        .map_err(|err| AppError::InternalError(err.to_string()))
}

async fn ensure_runtime_indexes_inner(db: &SurrealDbClient) -> Result<()> {
    create_fts_analyzer(db).await?;

    for spec in fts_index_specs() {
        if index_exists(db, spec.table, spec.index_name).await? {
            continue;
        }
        create_index_with_polling(db, spec.definition(), spec.index_name, spec.table).await?;
    }

    for spec in hnsw_index_specs() {
        if index_exists(db, spec.table, spec.index_name).await? {
            continue;
        }
        create_index_with_polling(
            db,
            spec.definition_if_not_exists(),
            spec.index_name,
            spec.table,
        )
        .await?;
    }

    Ok(())
}

async fn rebuild_indexes_inner(db: &SurrealDbClient) -> Result<()> {
    debug!("Rebuilding indexes with concurrent definitions");
    create_fts_analyzer(db).await?;

    for spec in fts_index_specs() {
        if !index_exists(db, spec.table, spec.index_name).await? {
            continue;
        }
        create_index_with_polling(db, spec.definition(), spec.index_name, spec.table).await?;
    }

    for spec in hnsw_index_specs() {
        if !index_exists(db, spec.table, spec.index_name).await? {
            continue;
        }
        create_index_with_polling(
            db,
            spec.definition_if_not_exists(),
            spec.index_name,
            spec.table,
        )
        .await?;
    }

    Ok(())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    let snowball_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);",
        analyzer = FTS_ANALYZER_NAME
    );

    match db.client.query(snowball_query).await {
        Ok(res) => {
            if res.check().is_ok() {
                return Ok(());
            }
            warn!("snowball analyzer check failed, attempting ascii fallback");
        }
        Err(err) => {
            warn!(error = %err, "snowball analyzer creation errored, attempting ascii fallback");
        }
    }

    let fallback_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS class
            FILTERS lowercase, ascii;",
        analyzer = FTS_ANALYZER_NAME
    );

    let res = db
        .client
        .query(fallback_query)
        .await
        .context("creating fallback FTS analyzer")?;

    res.check().context("failed to create fallback FTS analyzer")?;
    Ok(())
}

async fn create_index_with_polling(
    db: &SurrealDbClient,
    definition: String,
    index_name: &str,
    table: &str,
) -> Result<()> {
    let mut attempts = 0;
    const MAX_ATTEMPTS: usize = 3;
    loop {
        attempts += 1;
        let res = db
            .client
            .query(definition.clone())
            .await
            .with_context(|| format!("creating index {index_name} on table {table}"))?;
        match res.check() {
            Ok(_) => break,
            Err(err) => {
                let conflict = err.to_string().contains("read or write conflict");
                if conflict && attempts < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                return Err(err).with_context(|| {
                    format!("index definition failed for {index_name} on {table}")
                });
            }
        }
    }

    poll_index_build_status(db, index_name, table, INDEX_POLL_INTERVAL).await
}

async fn poll_index_build_status(
    db: &SurrealDbClient,
    index_name: &str,
    table: &str,
    poll_every: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(poll_every).await;

        let info_query = format!("INFO FOR INDEX {index_name} ON TABLE {table};");
        let mut info_res = db
            .client
            .query(info_query)
            .await
            .with_context(|| format!("checking index build status for {index_name}"))?;

        let info: Option<Value> = info_res
            .take(0)
            .context("failed to deserialize INFO FOR INDEX result")?;

        let Some(status) = building_status(info) else {
            break;
        };

        if status.eq_ignore_ascii_case("ready") || status.eq_ignore_ascii_case("error") {
            break;
        }
    }

    Ok(())
}

fn building_status(info: Option<Value>) -> Option<String> {
    let info = info?;
    let building = info.get("building");
    Some(
        building
            .and_then(|b| b.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("ready")
            .to_string(),
    )
}

#[derive(Debug, Deserialize)]
struct CountRow {
    #[allow(dead_code)]
    count: u64,
}

async fn table_index_definitions(
    db: &SurrealDbClient,
    table: &str,
) -> Result<Option<Map<String, Value>>> {
    let info_query = format!("INFO FOR TABLE {table};");
    let mut response = db
        .client
        .query(info_query)
        .await
        .with_context(|| format!("fetching table info for {table}"))?;

    let info: surrealdb::Value = response
        .take(0)
        .context("failed to take table info response")?;

    let info_json: Value =
        serde_json::to_value(info).context("serializing table info to JSON for parsing")?;

    Ok(info_json
        .get("Object")
        .and_then(|o| o.get("indexes"))
        .and_then(|i| i.get("Object"))
        .and_then(|i| i.as_object())
        .cloned())
}

async fn index_exists(db: &SurrealDbClient, table: &str, index_name: &str) -> Result<bool> {
    let Some(indexes) = table_index_definitions(db, table).await? else {
        return Ok(false);
    };
    Ok(indexes.contains_key(index_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let db = SurrealDbClient::memory().await.expect("in-memory db");
        db.build_schema().await.expect("schema should succeed");

        ensure_runtime_indexes(&db).await.expect("first pass");
        ensure_runtime_indexes(&db).await.expect("second pass is a no-op");
    }

    #[test]
    fn building_status_defaults_to_ready_when_absent() {
        let info = serde_json::json!({});
        assert_eq!(building_status(Some(info)), Some("ready".to_string()));
    }
}
