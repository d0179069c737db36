use std::sync::Arc;

use common::{storage::db::SurrealDbClient, utils::config::AppConfig};
use minijinja::Environment;

#[derive(Clone)]
pub struct HtmlState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub templates: Arc<Environment<'static>>,
}

impl HtmlState {
    pub fn new(db: Arc<SurrealDbClient>, config: AppConfig) -> Self {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/templates"
        )));
        Self { db, config, templates: Arc::new(env) }
    }
}
