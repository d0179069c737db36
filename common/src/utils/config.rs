use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Deployment environment, gates docs exposure and log verbosity (spec.md §6).
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeployEnvironment {
    Development,
    Staging,
    Production,
}

impl Default for DeployEnvironment {
    fn default() -> Self {
        DeployEnvironment::Development
    }
}

impl DeployEnvironment {
    pub fn default_log_level(self) -> &'static str {
        match self {
            DeployEnvironment::Development => "debug",
            DeployEnvironment::Staging | DeployEnvironment::Production => "info",
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_daily_budget_usd() -> f64 {
    10.00
}

fn default_embedding_dimension() -> usize {
    1536
}

fn default_ingest_max_body_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_http_port() -> u16 {
    8080
}

fn default_surrealdb_namespace() -> String {
    "arbiter".to_string()
}

fn default_surrealdb_database() -> String {
    "arbiter".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Application-wide configuration, layered from `config.{toml,yaml,json}` and
/// environment variables, mirroring every option spec.md §6 names plus the
/// operational knobs the server/worker binaries always need.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct AppConfig {
    /// `DATABASE_URL` — connection string for the persistent store.
    #[serde(default)]
    pub database_url: String,
    /// `CACHE_URL` — shared cache used for rate limits, job status, answer memo.
    /// The same SurrealDB instance backs both roles, so this defaults to
    /// `database_url` when unset.
    #[serde(default)]
    pub cache_url: Option<String>,
    /// `LLM_API_KEY` — credential for chat and embedding calls.
    #[serde(default)]
    pub llm_api_key: String,
    #[serde(default = "default_base_url")]
    pub llm_api_base_url: String,
    /// `DAILY_BUDGET_USD` — daily ceiling, default 10.00.
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,
    /// `OCR_CREDENTIALS` — optional credentials for cloud OCR.
    #[serde(default)]
    pub ocr_credentials: Option<String>,
    /// `FRONTEND_ORIGIN` — CORS allow-list entry.
    #[serde(default)]
    pub frontend_origin: Option<String>,
    /// `ENVIRONMENT` — gates docs exposure and log verbosity.
    #[serde(default)]
    pub environment: DeployEnvironment,

    #[serde(default)]
    pub surrealdb_username: String,
    #[serde(default)]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_ingest_max_body_bytes")]
    pub ingest_max_body_bytes: usize,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
}

impl AppConfig {
    pub fn cache_url(&self) -> &str {
        self.cache_url.as_deref().unwrap_or(&self.database_url)
    }

    pub fn embedding_model(&self) -> &str {
        self.embedding_model
            .as_deref()
            .unwrap_or("text-embedding-3-small")
    }

    pub fn chat_model(&self) -> &str {
        self.chat_model.as_deref().unwrap_or("gpt-4o-mini")
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .set_default("http_port", i64::from(default_http_port()))?
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
