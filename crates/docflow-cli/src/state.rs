//! Application state shared by all CLI subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use docflow_core::dispatcher::Dispatcher;
use docflow_core::registry::ActivityRegistry;
use docflow_infra::activity::{ExtractActivity, PersistActivity, SummarizeActivity};
use docflow_infra::config::{database_url, default_data_dir, load_config};
use docflow_infra::sqlite::{DatabasePool, SqliteExecutionLog};
use docflow_infra::store::DocumentStore;
use docflow_types::config::DocflowConfig;
use docflow_types::job::Stage;

/// Everything a subcommand needs: configuration, the shared document store
/// and the dispatcher over the SQLite execution log.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: DocflowConfig,
    pub store: Arc<DocumentStore>,
    pub dispatcher: Dispatcher<SqliteExecutionLog>,
}

impl AppState {
    /// Initialize data directory, configuration, database and dispatcher.
    ///
    /// The document store is constructed once here and shared by every job
    /// as an explicit handle with process lifetime.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = default_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let store = Arc::new(DocumentStore::new(data_dir.clone()));
        store
            .ensure_containers()
            .await
            .context("failed to create input/output containers")?;

        let pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open database")?;
        let log = Arc::new(SqliteExecutionLog::new(pool));

        let mut registry = ActivityRegistry::new();
        registry.register(
            Stage::Extract,
            ExtractActivity::new(Arc::clone(&store), config.extraction.clone()),
        );
        registry.register(
            Stage::Summarize,
            SummarizeActivity::new(config.summarization.clone()),
        );
        registry.register(Stage::Persist, PersistActivity::new(Arc::clone(&store)));

        let dispatcher = Dispatcher::new(log, Arc::new(registry), config.pipeline.clone());

        Ok(Self {
            data_dir,
            config,
            store,
            dispatcher,
        })
    }
}
