//! Input-container watcher -- the pipeline's trigger source.
//!
//! Watches the input directory with a debounced filesystem watcher and
//! emits one [`DocumentEvent`] per new or changed document matching the
//! configured extensions. The dispatcher turns each event into one job; no
//! deduplication happens here.

use std::path::{Path, PathBuf};
use std::time::Duration;

// Use notify types re-exported through notify-debouncer-mini so the watcher
// and debouncer are compiled against the same notify version.
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;

use crate::store::document_name;

/// Default debounce window in milliseconds.
const DEFAULT_DEBOUNCE_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up the watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Failed to create the filesystem watcher.
    #[error("watcher creation failed: {0}")]
    Creation(String),

    /// Failed to add the input directory to the watcher.
    #[error("failed to watch '{path}': {reason}")]
    WatchPath { path: String, reason: String },
}

// ---------------------------------------------------------------------------
// DocumentEvent
// ---------------------------------------------------------------------------

/// A document arriving in the input container.
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    /// File name within the input container.
    pub name: String,
    /// When the change was detected.
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

impl DocumentEvent {
    /// The job input payload for this document.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({"name": self.name})
    }
}

// ---------------------------------------------------------------------------
// WatcherHandle
// ---------------------------------------------------------------------------

/// RAII handle that keeps the filesystem watcher alive.
///
/// Dropping the handle stops the watch.
pub struct WatcherHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
    watched_dir: PathBuf,
}

impl WatcherHandle {
    /// The directory being watched.
    pub fn watched_dir(&self) -> &Path {
        &self.watched_dir
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        tracing::debug!(dir = %self.watched_dir.display(), "document watcher dropped");
    }
}

// ---------------------------------------------------------------------------
// Extension filter
// ---------------------------------------------------------------------------

/// Case-insensitive extension match. An empty extension list accepts every
/// file.
pub fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

// ---------------------------------------------------------------------------
// Watcher lifecycle
// ---------------------------------------------------------------------------

/// Start a debounced watcher over the input directory.
///
/// Returns a [`WatcherHandle`] (keep alive to maintain the watch) and a
/// receiver that yields one [`DocumentEvent`] per matching file change.
///
/// # Arguments
/// - `input_dir`: The input container directory
/// - `extensions`: File extensions to accept (e.g. `["pdf"]`); empty accepts all
/// - `debounce_ms`: Debounce duration in milliseconds (default 500)
pub fn start_document_watcher(
    input_dir: &Path,
    extensions: Vec<String>,
    debounce_ms: Option<u64>,
) -> Result<(WatcherHandle, mpsc::Receiver<DocumentEvent>), WatchError> {
    let debounce = Duration::from_millis(debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));
    let (tx, rx) = mpsc::channel::<DocumentEvent>(64);

    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let now = chrono::Utc::now();
                for event in events {
                    if !matches_extension(&event.path, &extensions) {
                        continue;
                    }
                    let Some(name) = document_name(&event.path) else {
                        continue;
                    };

                    tracing::debug!(name, "document change detected");

                    // Non-blocking send; when the channel is full the event
                    // is dropped, which is acceptable for a trigger source.
                    let _ = tx.try_send(DocumentEvent {
                        name: name.to_string(),
                        detected_at: now,
                    });
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "document watcher error");
            }
        }
    })
    .map_err(|e| WatchError::Creation(e.to_string()))?;

    debouncer
        .watcher()
        .watch(input_dir, RecursiveMode::NonRecursive)
        .map_err(|e| WatchError::WatchPath {
            path: input_dir.display().to_string(),
            reason: e.to_string(),
        })?;

    tracing::info!(dir = %input_dir.display(), "document watcher started");

    let handle = WatcherHandle {
        _debouncer: debouncer,
        watched_dir: input_dir.to_path_buf(),
    };

    Ok((handle, rx))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
