//! Summarization activity: extracted text in, summary payload out.
//!
//! Sends a single-shot chat completion to an OpenAI-compatible endpoint. A
//! failed completion raises `ActivityError` rather than returning a
//! sentinel payload, so the retry policy governs API failures the same way
//! it governs every other stage failure.

use docflow_core::registry::Activity;
use docflow_types::config::SummarizationConfig;
use docflow_types::error::ActivityError;
use serde::Deserialize;
use serde_json::{Value, json};

use super::field_str;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes PDF documents.";
const MAX_TOKENS: u32 = 500;
const TEMPERATURE: f64 = 0.5;

/// Calls the chat-completion API for the summarize stage.
///
/// Does not derive Debug: the struct holds the API key.
pub struct SummarizeActivity {
    client: reqwest::Client,
    config: SummarizationConfig,
}

impl SummarizeActivity {
    pub fn new(config: SummarizationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

impl Activity for SummarizeActivity {
    async fn run(&self, input: Value) -> Result<Value, ActivityError> {
        let name = field_str(&input, "name")?;
        let text = field_str(&input, "text")?;

        let body = completion_body(&self.config.model, text);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ActivityError::Service(format!("chat completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActivityError::Service(format!(
                "chat completion returned {status}"
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ActivityError::Service(format!("invalid completion response: {e}")))?;

        let summary = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ActivityError::Service("completion returned no choices".to_string()))?;

        tracing::debug!(name, chars = summary.len(), "summary generated");

        Ok(json!({"name": name, "summary": {"content": summary}}))
    }
}

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

/// Chat-completion request body for a summarization prompt.
fn completion_body(model: &str, text: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {
                "role": "user",
                "content": format!("Can you summarize what the following text is about?\n\n{text}"),
            },
        ],
        "max_tokens": MAX_TOKENS,
        "temperature": TEMPERATURE,
    })
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
