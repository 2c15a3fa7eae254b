//! Application state wiring the engine to its SQLite repositories.
//!
//! The engine services are generic over repository traits; `AppState` pins
//! them to the concrete infra implementations and is shared by the CLI
//! commands and the REST handlers.

use std::path::PathBuf;
use std::sync::Arc;

use hrflow_core::workflow::engine::Engine;
use hrflow_infra::sqlite::definition::SqliteDefinitionRepository;
use hrflow_infra::sqlite::directory::SqliteEmployeeDirectory;
use hrflow_infra::sqlite::instance::SqliteInstanceRepository;
use hrflow_infra::sqlite::pool::DatabasePool;
use hrflow_infra::templates::{TemplateLoadReport, load_system_templates};
use hrflow_types::config::EngineConfig;

pub type ConcreteEngine =
    Engine<SqliteDefinitionRepository, SqliteInstanceRepository, SqliteEmployeeDirectory>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    /// Same directory instance the engine resolves assignees through.
    pub directory: Arc<SqliteEmployeeDirectory>,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the database and wire the engine.
    pub async fn init(
        data_dir: PathBuf,
        database_url: &str,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;
        let db_pool = DatabasePool::new(database_url).await?;
        Ok(Self::from_pool(db_pool, config, data_dir))
    }

    pub fn from_pool(db_pool: DatabasePool, config: EngineConfig, data_dir: PathBuf) -> Self {
        let directory = Arc::new(SqliteEmployeeDirectory::new(db_pool.clone()));
        let engine = Engine::new(
            Arc::new(SqliteDefinitionRepository::new(db_pool.clone())),
            Arc::new(SqliteInstanceRepository::new(db_pool)),
            directory.clone(),
            &config,
        );
        Self {
            engine: Arc::new(engine),
            directory,
            config: Arc::new(config),
            data_dir,
        }
    }

    /// Seed system templates from the configured directory, if any.
    pub async fn load_configured_templates(&self) -> anyhow::Result<Option<TemplateLoadReport>> {
        let Some(dir) = &self.config.templates_dir else {
            return Ok(None);
        };
        let report = load_system_templates(&self.engine.store, dir).await?;
        Ok(Some(report))
    }
}
