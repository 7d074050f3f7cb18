//! Job and stage-attempt domain types for Docflow.
//!
//! A `Job` is one pass of a document through the fixed three-stage pipeline
//! (extract, summarize, persist). Execution tracking lives in
//! `StageAttempt` records: one row per try of one stage, with a write-once
//! terminal outcome. Together they are everything the orchestrator needs to
//! resume a job after a crash without re-running completed stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A pipeline stage. Tagged variants instead of free-form strings so that
/// dispatch is exhaustive and typos are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// OCR / layout extraction of the document text.
    Extract,
    /// LLM summarization of the extracted text.
    Summarize,
    /// Writing the summary back to the output container.
    Persist,
}

impl Stage {
    /// The fixed pipeline, in execution order.
    pub const PIPELINE: [Stage; 3] = [Stage::Extract, Stage::Summarize, Stage::Persist];

    /// Stable string form, used as the storage and display key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Summarize => "summarize",
            Stage::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(Stage::Extract),
            "summarize" => Ok(Stage::Summarize),
            "persist" => Ok(Stage::Persist),
            other => Err(format!("unknown stage: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Overall status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this status is terminal (the orchestrator will not advance
    /// the job any further on its own).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A single pass of a document through the pipeline.
///
/// The orchestrator is the sole writer of `status`, `current_stage` and
/// `output`; everything else is set at creation. `current_stage` is the
/// resumption cursor: the index of the next stage to run, persisted before
/// the orchestrator advances so a restarted worker picks up exactly where
/// the previous one stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUIDv7 job ID (time-sortable).
    pub id: Uuid,
    /// Ordered stage sequence to execute.
    pub stages: Vec<Stage>,
    /// Index of the next stage to run (0-based).
    pub current_stage: u32,
    /// Current job status.
    pub status: JobStatus,
    /// The trigger payload the job was created with.
    pub input: serde_json::Value,
    /// Output of the most recently completed stage. Becomes the input to
    /// the next stage; after completion it is the job's final result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Error message if the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job for the fixed pipeline.
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            stages: Stage::PIPELINE.to_vec(),
            current_stage: 0,
            status: JobStatus::Pending,
            input,
            output: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage attempts
// ---------------------------------------------------------------------------

/// Terminal-or-pending outcome of one attempt at one stage.
///
/// Outcomes are write-once: an attempt transitions from `Pending` to exactly
/// one of `Success` or `Failure` and never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt has been allocated but has not finished yet.
    Pending,
    /// The stage produced an output payload.
    Success { payload: serde_json::Value },
    /// The stage failed with an error message.
    Failure { error: String },
}

impl AttemptOutcome {
    /// Whether the outcome is terminal (success or failure).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptOutcome::Pending)
    }
}

/// One recorded try of one stage of one job.
///
/// Keyed by `(job_id, stage_index, attempt)`; attempt numbers are 1-based
/// and allocated monotonically by the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageAttempt {
    /// Parent job ID.
    pub job_id: Uuid,
    /// Stage index within the job's stage sequence (0-based).
    pub stage_index: u32,
    /// Attempt number (1-based, increments on retry).
    pub attempt: u32,
    /// The attempt outcome.
    pub outcome: AttemptOutcome,
    /// When the attempt was allocated.
    pub started_at: DateTime<Utc>,
    /// When the terminal outcome was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
