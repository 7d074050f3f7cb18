//! Extraction activity: document bytes in, plain text out.
//!
//! Reads the document from the input container and sends it to the
//! layout-analysis service, then flattens the page/line structure into a
//! single space-joined string.

use std::sync::Arc;

use docflow_core::registry::Activity;
use docflow_types::config::ExtractionConfig;
use docflow_types::error::ActivityError;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::{Container, DocumentStore, StoreError};

use super::field_str;

/// Calls the layout-analysis service for the extract stage.
pub struct ExtractActivity {
    store: Arc<DocumentStore>,
    client: reqwest::Client,
    config: ExtractionConfig,
}

impl ExtractActivity {
    pub fn new(store: Arc<DocumentStore>, config: ExtractionConfig) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            config,
        }
    }
}

impl Activity for ExtractActivity {
    async fn run(&self, input: Value) -> Result<Value, ActivityError> {
        let name = field_str(&input, "name")?;

        let bytes = self
            .store
            .get(Container::Input, name)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(name) => {
                    ActivityError::InvalidInput(format!("document '{name}' not in input container"))
                }
                other => ActivityError::Service(other.to_string()),
            })?;

        let url = format!("{}/analyze", self.config.endpoint.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        if !self.config.api_key.is_empty() {
            request = request.header("x-api-key", &self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ActivityError::Service(format!("layout service request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActivityError::Service(format!(
                "layout service returned {status}"
            )));
        }

        let analysis: AnalysisResponse = response
            .json()
            .await
            .map_err(|e| ActivityError::Service(format!("invalid layout response: {e}")))?;

        let text = flatten_pages(&analysis);
        tracing::debug!(name, chars = text.len(), "document text extracted");

        Ok(json!({"name": name, "text": text}))
    }
}

// ---------------------------------------------------------------------------
// Layout response shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    pages: Vec<AnalysisPage>,
}

#[derive(Debug, Deserialize)]
struct AnalysisPage {
    #[serde(default)]
    lines: Vec<AnalysisLine>,
}

#[derive(Debug, Deserialize)]
struct AnalysisLine {
    content: String,
}

/// Join every line of every page with single spaces and trim the result.
fn flatten_pages(analysis: &AnalysisResponse) -> String {
    let mut doc = String::new();
    for page in &analysis.pages {
        for line in &page.lines {
            doc.push_str(&line.content);
            doc.push(' ');
        }
    }
    doc.trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
