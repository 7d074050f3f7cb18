//! Stage activity adapters.
//!
//! Each adapter is a thin, stateless bridge between the core `Activity`
//! seam and one external collaborator: the layout-analysis service, the
//! chat-completion API, and the output container. Payloads thread the
//! document name through the pipeline so the persist stage can derive the
//! summary file name.

pub mod extract;
pub mod persist;
pub mod summarize;

pub use extract::ExtractActivity;
pub use persist::PersistActivity;
pub use summarize::SummarizeActivity;

use docflow_types::error::ActivityError;
use serde_json::Value;

/// Required string field of an activity input payload.
fn field_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ActivityError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityError::InvalidInput(format!("missing '{field}' field")))
}
