//! Persistence activity: summary payload in, stored file name out.
//!
//! Writes the summary text to the output container under a timestamped,
//! sanitized file name and returns that name as the stage output.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use docflow_core::registry::Activity;
use docflow_types::error::ActivityError;
use serde_json::{Value, json};

use crate::store::{Container, DocumentStore};

use super::field_str;

/// Writes the summary to the output container for the persist stage.
pub struct PersistActivity {
    store: Arc<DocumentStore>,
}

impl PersistActivity {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

impl Activity for PersistActivity {
    async fn run(&self, input: Value) -> Result<Value, ActivityError> {
        let name = field_str(&input, "name")?;
        let content = input
            .get("summary")
            .and_then(|s| s.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ActivityError::InvalidInput("missing 'summary.content' field".to_string())
            })?;

        let file_name = summary_file_name(name, Utc::now());
        self.store
            .put(Container::Output, &file_name, content.as_bytes())
            .await
            .map_err(|e| ActivityError::Service(format!("output write failed: {e}")))?;

        tracing::info!(name, file_name = file_name.as_str(), "summary persisted");
        Ok(json!(file_name))
    }
}

/// Output file name: `{name}-{timestamp}` with dots and colons sanitized to
/// dashes, suffixed `.txt`.
fn summary_file_name(name: &str, at: DateTime<Utc>) -> String {
    let stamped = format!(
        "{}-{}",
        name,
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let sanitized = stamped.replace(['.', ':'], "-");
    format!("{sanitized}.txt")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_summary_file_name_sanitizes_dots_and_colons() {
        let at = Utc.with_ymd_and_hms(2026, 8, 7, 10, 30, 0).unwrap();
        let file_name = summary_file_name("doc1.pdf", at);
        assert_eq!(file_name, "doc1-pdf-2026-08-07T10-30-00Z.txt");
        assert!(!file_name.trim_end_matches(".txt").contains('.'));
        assert!(!file_name.contains(':'));
    }

    #[test]
    fn test_summary_file_names_differ_over_time() {
        let first = summary_file_name(
            "a.pdf",
            Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap(),
        );
        let second = summary_file_name(
            "a.pdf",
            Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 1).unwrap(),
        );
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_run_writes_summary_and_returns_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::new(tmp.path().to_path_buf()));
        let activity = PersistActivity::new(Arc::clone(&store));

        let output = activity
            .run(json!({
                "name": "doc1.pdf",
                "summary": {"content": "a greeting"}
            }))
            .await
            .unwrap();

        let file_name = output.as_str().unwrap();
        assert!(file_name.starts_with("doc1-pdf-"));
        assert!(file_name.ends_with(".txt"));

        let stored = store.get(Container::Output, file_name).await.unwrap();
        assert_eq!(stored, b"a greeting");
    }

    #[tokio::test]
    async fn test_missing_summary_content_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::new(tmp.path().to_path_buf()));
        let activity = PersistActivity::new(store);

        for input in [
            json!({"name": "doc1.pdf"}),
            json!({"name": "doc1.pdf", "summary": {}}),
            json!({"summary": {"content": "x"}}),
        ] {
            let err = activity.run(input).await.unwrap_err();
            assert!(matches!(err, ActivityError::InvalidInput(_)));
        }
    }
}
