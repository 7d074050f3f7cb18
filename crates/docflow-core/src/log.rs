//! Durable execution log port, and an in-memory reference implementation.
//!
//! The [`ExecutionLog`] trait is the single point of coordination between
//! jobs and the only durable contract the engine requires from storage: a
//! record per `(job_id, stage_index, attempt)` with atomic per-key writes.
//! The infrastructure layer implements it with SQLite; [`MemoryLog`] here
//! implements the same contract in memory for tests and embedding.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use docflow_types::error::LogError;
use docflow_types::job::{AttemptOutcome, Job, JobStatus, StageAttempt};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionLog trait
// ---------------------------------------------------------------------------

/// Append-only, crash-recoverable record of job and stage-attempt state.
///
/// Invariants every implementation must enforce:
/// - at most one `Pending` attempt per `(job_id, stage_index)` at a time
///   (`append_attempt` fails with [`LogError::ConcurrentAttempt`] otherwise);
/// - attempt numbers per `(job_id, stage_index)` are allocated 1, 2, 3, ...;
/// - outcomes are write-once: a second `record_outcome` for the same attempt
///   fails with [`LogError::AlreadyRecorded`] and leaves the stored outcome
///   unchanged.
pub trait ExecutionLog: Send + Sync {
    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// Persist a newly created job.
    fn create_job(
        &self,
        job: &Job,
    ) -> impl std::future::Future<Output = Result<(), LogError>> + Send;

    /// Fetch a job by ID.
    fn get_job(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Job>, LogError>> + Send;

    /// Checkpoint a job's status and resumption cursor.
    ///
    /// `output` and `error`, when `None`, leave the stored values untouched.
    /// Terminal statuses also stamp `completed_at`.
    fn update_job(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        current_stage: u32,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), LogError>> + Send;

    /// List jobs, newest first.
    fn list_jobs(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, LogError>> + Send;

    /// Jobs left in a non-terminal status by a previous worker (crash sweep).
    fn list_interrupted_jobs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Job>, LogError>> + Send;

    // -----------------------------------------------------------------------
    // Stage attempts
    // -----------------------------------------------------------------------

    /// Allocate and durably record a new `Pending` attempt for the stage.
    ///
    /// Returns the 1-based attempt number. Fails with
    /// [`LogError::ConcurrentAttempt`] when a pending attempt already exists
    /// for this `(job_id, stage_index)`.
    fn append_attempt(
        &self,
        job_id: &Uuid,
        stage_index: u32,
    ) -> impl std::future::Future<Output = Result<u32, LogError>> + Send;

    /// Durably transition an attempt to its terminal outcome.
    ///
    /// `outcome` must be `Success` or `Failure`. Fails with
    /// [`LogError::UnknownAttempt`] if the attempt was never appended and
    /// [`LogError::AlreadyRecorded`] if it already has a terminal outcome.
    fn record_outcome(
        &self,
        job_id: &Uuid,
        stage_index: u32,
        attempt: u32,
        outcome: &AttemptOutcome,
    ) -> impl std::future::Future<Output = Result<(), LogError>> + Send;

    /// Payload of the `Success` attempt for the stage, if one exists.
    ///
    /// This is the replay/resume primitive: the orchestrator consults it
    /// before executing a stage and skips the stage when it returns `Some`.
    fn completed_outcome(
        &self,
        job_id: &Uuid,
        stage_index: u32,
    ) -> impl std::future::Future<Output = Result<Option<Value>, LogError>> + Send;

    /// All attempts for a job, ordered by stage index then attempt number.
    fn list_attempts(
        &self,
        job_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StageAttempt>, LogError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryLog
// ---------------------------------------------------------------------------

/// In-memory [`ExecutionLog`] with the same invariants as the SQLite
/// implementation. Not durable; intended for tests and embedded use.
#[derive(Default)]
pub struct MemoryLog {
    inner: Mutex<MemoryLogInner>,
}

#[derive(Default)]
struct MemoryLogInner {
    jobs: HashMap<Uuid, Job>,
    attempts: HashMap<Uuid, Vec<StageAttempt>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionLog for MemoryLog {
    async fn create_job(&self, job: &Job) -> Result<(), LogError> {
        let mut inner = self.inner.lock().expect("memory log poisoned");
        inner.jobs.insert(job.id, job.clone());
        inner.attempts.entry(job.id).or_default();
        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<Job>, LogError> {
        let inner = self.inner.lock().expect("memory log poisoned");
        Ok(inner.jobs.get(job_id).cloned())
    }

    async fn update_job(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        current_stage: u32,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), LogError> {
        let mut inner = self.inner.lock().expect("memory log poisoned");
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or(LogError::JobNotFound(*job_id))?;
        job.status = status;
        job.current_stage = current_stage;
        if let Some(output) = output {
            job.output = Some(output.clone());
        }
        if let Some(error) = error {
            job.error = Some(error.to_string());
        }
        if status.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>, LogError> {
        let inner = self.inner.lock().expect("memory log poisoned");
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        // UUIDv7 ids sort by creation time.
        jobs.sort_by(|a, b| b.id.cmp(&a.id));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn list_interrupted_jobs(&self) -> Result<Vec<Job>, LogError> {
        let inner = self.inner.lock().expect("memory log poisoned");
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    async fn append_attempt(&self, job_id: &Uuid, stage_index: u32) -> Result<u32, LogError> {
        let mut inner = self.inner.lock().expect("memory log poisoned");
        if !inner.jobs.contains_key(job_id) {
            return Err(LogError::JobNotFound(*job_id));
        }
        let attempts = inner.attempts.entry(*job_id).or_default();

        let stage_attempts = attempts
            .iter()
            .filter(|a| a.stage_index == stage_index);
        let mut next = 1;
        for existing in stage_attempts {
            if existing.outcome == AttemptOutcome::Pending {
                return Err(LogError::ConcurrentAttempt {
                    job_id: *job_id,
                    stage_index,
                });
            }
            next = next.max(existing.attempt + 1);
        }

        attempts.push(StageAttempt {
            job_id: *job_id,
            stage_index,
            attempt: next,
            outcome: AttemptOutcome::Pending,
            started_at: Utc::now(),
            completed_at: None,
        });
        Ok(next)
    }

    async fn record_outcome(
        &self,
        job_id: &Uuid,
        stage_index: u32,
        attempt: u32,
        outcome: &AttemptOutcome,
    ) -> Result<(), LogError> {
        if !outcome.is_terminal() {
            return Err(LogError::Storage(
                "recorded outcome must be terminal".to_string(),
            ));
        }

        let mut inner = self.inner.lock().expect("memory log poisoned");
        let attempts = inner
            .attempts
            .get_mut(job_id)
            .ok_or(LogError::UnknownAttempt {
                job_id: *job_id,
                stage_index,
                attempt,
            })?;

        let record = attempts
            .iter_mut()
            .find(|a| a.stage_index == stage_index && a.attempt == attempt)
            .ok_or(LogError::UnknownAttempt {
                job_id: *job_id,
                stage_index,
                attempt,
            })?;

        if record.outcome.is_terminal() {
            return Err(LogError::AlreadyRecorded {
                job_id: *job_id,
                stage_index,
                attempt,
            });
        }

        record.outcome = outcome.clone();
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn completed_outcome(
        &self,
        job_id: &Uuid,
        stage_index: u32,
    ) -> Result<Option<Value>, LogError> {
        let inner = self.inner.lock().expect("memory log poisoned");
        let Some(attempts) = inner.attempts.get(job_id) else {
            return Ok(None);
        };
        Ok(attempts.iter().find_map(|a| {
            if a.stage_index != stage_index {
                return None;
            }
            match &a.outcome {
                AttemptOutcome::Success { payload } => Some(payload.clone()),
                _ => None,
            }
        }))
    }

    async fn list_attempts(&self, job_id: &Uuid) -> Result<Vec<StageAttempt>, LogError> {
        let inner = self.inner.lock().expect("memory log poisoned");
        let mut attempts = inner.attempts.get(job_id).cloned().unwrap_or_default();
        attempts.sort_by_key(|a| (a.stage_index, a.attempt));
        Ok(attempts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn log_with_job() -> (MemoryLog, Uuid) {
        let log = MemoryLog::new();
        let job = Job::new(json!({"name": "doc1.pdf"}));
        let id = job.id;
        log.create_job(&job).await.unwrap();
        (log, id)
    }

    // -------------------------------------------------------------------
    // Attempt allocation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_attempt_numbers_are_monotonic_from_one() {
        let (log, id) = log_with_job().await;

        let first = log.append_attempt(&id, 0).await.unwrap();
        assert_eq!(first, 1);
        log.record_outcome(
            &id,
            0,
            first,
            &AttemptOutcome::Failure {
                error: "x".to_string(),
            },
        )
        .await
        .unwrap();

        let second = log.append_attempt(&id, 0).await.unwrap();
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_at_most_one_pending_attempt() {
        let (log, id) = log_with_job().await;

        log.append_attempt(&id, 0).await.unwrap();
        let err = log.append_attempt(&id, 0).await.unwrap_err();
        assert!(matches!(err, LogError::ConcurrentAttempt { .. }));

        // A different stage index is unaffected.
        assert_eq!(log.append_attempt(&id, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_attempt_unknown_job() {
        let log = MemoryLog::new();
        let err = log.append_attempt(&Uuid::now_v7(), 0).await.unwrap_err();
        assert!(matches!(err, LogError::JobNotFound(_)));
    }

    // -------------------------------------------------------------------
    // Outcome recording
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_outcomes_are_write_once() {
        let (log, id) = log_with_job().await;
        let attempt = log.append_attempt(&id, 0).await.unwrap();

        log.record_outcome(
            &id,
            0,
            attempt,
            &AttemptOutcome::Success {
                payload: json!("hello world"),
            },
        )
        .await
        .unwrap();

        let err = log
            .record_outcome(
                &id,
                0,
                attempt,
                &AttemptOutcome::Failure {
                    error: "late".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::AlreadyRecorded { .. }));

        // Stored outcome is unchanged.
        let outcome = log.completed_outcome(&id, 0).await.unwrap();
        assert_eq!(outcome, Some(json!("hello world")));
    }

    #[tokio::test]
    async fn test_record_outcome_unknown_attempt() {
        let (log, id) = log_with_job().await;
        let err = log
            .record_outcome(
                &id,
                0,
                7,
                &AttemptOutcome::Success { payload: json!(1) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::UnknownAttempt { attempt: 7, .. }));
    }

    #[tokio::test]
    async fn test_record_outcome_rejects_pending() {
        let (log, id) = log_with_job().await;
        let attempt = log.append_attempt(&id, 0).await.unwrap();
        let err = log
            .record_outcome(&id, 0, attempt, &AttemptOutcome::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::Storage(_)));
    }

    // -------------------------------------------------------------------
    // Resume primitive
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_completed_outcome_none_without_success() {
        let (log, id) = log_with_job().await;
        assert_eq!(log.completed_outcome(&id, 0).await.unwrap(), None);

        let attempt = log.append_attempt(&id, 0).await.unwrap();
        log.record_outcome(
            &id,
            0,
            attempt,
            &AttemptOutcome::Failure {
                error: "x".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(log.completed_outcome(&id, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_attempts_ordering() {
        let (log, id) = log_with_job().await;
        for stage in 0..2u32 {
            let a = log.append_attempt(&id, stage).await.unwrap();
            log.record_outcome(
                &id,
                stage,
                a,
                &AttemptOutcome::Failure {
                    error: "x".to_string(),
                },
            )
            .await
            .unwrap();
            let b = log.append_attempt(&id, stage).await.unwrap();
            log.record_outcome(
                &id,
                stage,
                b,
                &AttemptOutcome::Success {
                    payload: json!(stage),
                },
            )
            .await
            .unwrap();
        }

        let attempts = log.list_attempts(&id).await.unwrap();
        let keys: Vec<(u32, u32)> = attempts
            .iter()
            .map(|a| (a.stage_index, a.attempt))
            .collect();
        assert_eq!(keys, vec![(0, 1), (0, 2), (1, 1), (1, 2)]);
    }

    // -------------------------------------------------------------------
    // Job records
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_update_job_checkpoints_cursor_and_stamps_completion() {
        let (log, id) = log_with_job().await;

        log.update_job(&id, JobStatus::Running, 1, Some(&json!("text")), None)
            .await
            .unwrap();
        let job = log.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.current_stage, 1);
        assert_eq!(job.output, Some(json!("text")));
        assert!(job.completed_at.is_none());

        // None output leaves the stored value untouched.
        log.update_job(&id, JobStatus::Completed, 3, None, None)
            .await
            .unwrap();
        let job = log.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.output, Some(json!("text")));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_interrupted_jobs() {
        let log = MemoryLog::new();
        let running = Job::new(json!({}));
        let done = Job::new(json!({}));
        log.create_job(&running).await.unwrap();
        log.create_job(&done).await.unwrap();

        log.update_job(&running.id, JobStatus::Running, 1, None, None)
            .await
            .unwrap();
        log.update_job(&done.id, JobStatus::Completed, 3, None, None)
            .await
            .unwrap();

        let interrupted = log.list_interrupted_jobs().await.unwrap();
        assert_eq!(interrupted.len(), 1);
        assert_eq!(interrupted[0].id, running.id);
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first() {
        let log = MemoryLog::new();
        let a = Job::new(json!({}));
        let b = Job::new(json!({}));
        log.create_job(&a).await.unwrap();
        log.create_job(&b).await.unwrap();

        let jobs = log.list_jobs(10).await.unwrap();
        assert_eq!(jobs[0].id, b.id);
        assert_eq!(jobs[1].id, a.id);

        let jobs = log.list_jobs(1).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }
}
