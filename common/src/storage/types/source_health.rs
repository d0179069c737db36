use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Changed,
    Unreachable,
    Error,
}

stored_object!(SourceHealth, "source_health", {
    source_id: String,
    checked_at: chrono::DateTime<chrono::Utc>,
    status: HealthStatus,
    http_code: Option<i64>,
    file_hash: Option<String>,
    content_length: Option<i64>,
    error: Option<String>
});

impl SourceHealth {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: String,
        status: HealthStatus,
        http_code: Option<i64>,
        file_hash: Option<String>,
        content_length: Option<i64>,
        error: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_id,
            checked_at: now,
            status,
            http_code,
            file_hash,
            content_length,
            error,
        }
    }

    pub async fn list_for_source(
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .query("SELECT * FROM source_health WHERE source_id = $source_id ORDER BY checked_at DESC")
            .bind(("source_id", source_id.to_string()))
            .await?;
        Ok(result.take(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_only_log_keeps_every_check() {
        let db = SurrealDbClient::memory().await.expect("memory db");
        db.store_item(SourceHealth::new(
            "source-1".into(),
            HealthStatus::Ok,
            Some(200),
            Some("abc".into()),
            Some(1024),
            None,
        ))
        .await
        .expect("store first");
        db.store_item(SourceHealth::new(
            "source-1".into(),
            HealthStatus::Changed,
            Some(200),
            Some("def".into()),
            Some(1200),
            None,
        ))
        .await
        .expect("store second");

        let log = SourceHealth::list_for_source("source-1", &db)
            .await
            .expect("list");
        assert_eq!(log.len(), 2);
    }
}
