use thiserror::Error;
use uuid::Uuid;

use crate::job::Stage;

/// Errors raised by a stage activity.
///
/// Activity failures are recoverable: the orchestrator records them as
/// `Failure` outcomes and consults the retry policy.
#[derive(Debug, Clone, Error)]
pub enum ActivityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service call failed: {0}")]
    Service(String),

    #[error("activity timed out")]
    Timeout,
}

/// Errors from the durable execution log.
///
/// `ConcurrentAttempt` is expected under crash-recovery races and is handled
/// inside the orchestrator. `UnknownAttempt` and `AlreadyRecorded` indicate a
/// consistency violation and fail the job.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("a pending attempt already exists for job {job_id} stage {stage_index}")]
    ConcurrentAttempt { job_id: Uuid, stage_index: u32 },

    #[error("attempt {attempt} for job {job_id} stage {stage_index} was never appended")]
    UnknownAttempt {
        job_id: Uuid,
        stage_index: u32,
        attempt: u32,
    },

    #[error("attempt {attempt} for job {job_id} stage {stage_index} already has a terminal outcome")]
    AlreadyRecorded {
        job_id: Uuid,
        stage_index: u32,
        attempt: u32,
    },

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from the activity registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No activity registered for the stage. Fatal: the job cannot start.
    #[error("no activity registered for stage '{stage}'")]
    UnknownActivity { stage: Stage },

    /// The activity itself failed. Recoverable via the retry policy.
    #[error(transparent)]
    Activity(#[from] ActivityError),
}
