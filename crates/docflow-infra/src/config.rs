//! Configuration loader for Docflow.
//!
//! Reads `config.toml` from the data directory (`~/.docflow/` by default)
//! and deserializes it into [`DocflowConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};

use docflow_types::config::DocflowConfig;

/// Resolve the data directory: `DOCFLOW_DATA_DIR` when set, otherwise
/// `~/.docflow`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DOCFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docflow")
}

/// SQLite database URL inside the data directory.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}/docflow.db?mode=rwc", data_dir.display())
}

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`DocflowConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the
///   default.
/// - A summarization API key left empty in the file falls back to the
///   `OPENAI_API_KEY` environment variable.
pub async fn load_config(data_dir: &Path) -> DocflowConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "No config.toml found at {}, using defaults",
                config_path.display()
            );
            return with_env_fallbacks(DocflowConfig::default());
        }
        Err(err) => {
            tracing::warn!(
                "Failed to read {}: {err}, using defaults",
                config_path.display()
            );
            return with_env_fallbacks(DocflowConfig::default());
        }
    };

    let config = match toml::from_str::<DocflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            DocflowConfig::default()
        }
    };

    with_env_fallbacks(config)
}

fn with_env_fallbacks(mut config: DocflowConfig) -> DocflowConfig {
    if config.summarization.api_key.is_empty() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.summarization.api_key = key;
        }
    }
    config
}
