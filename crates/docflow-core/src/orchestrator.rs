//! Job orchestrator -- the workflow state machine.
//!
//! Drives one job's stage sequence against the durable execution log:
//! consult the log before executing a stage (resume semantics), allocate an
//! attempt, invoke the activity inside a bounded window, record the outcome,
//! and apply the retry policy on failure. Every control decision is a pure
//! function of the log's content plus the policy, which is what makes replay
//! deterministic; side effects are confined to log writes and activity
//! invocations.
//!
//! # Execution flow, per stage index in ascending order
//!
//! 1. `completed_outcome` -- if present, skip straight to advancing the
//!    cursor with that payload. A completed stage is never re-executed.
//! 2. `append_attempt` -- a `ConcurrentAttempt` error is a crash-recovery
//!    signal: probe for the in-flight attempt's outcome instead of starting
//!    a duplicate.
//! 3. Invoke the stage activity with the previous stage's output (the job
//!    input for stage 0) under the stage timeout.
//! 4. Record `Success`/`Failure`; on failure consult the retry policy.
//! 5. Checkpoint the advanced cursor; after the last stage the job is
//!    `Completed` carrying the final output.

use std::sync::Arc;
use std::time::Duration;

use docflow_types::config::PipelineConfig;
use docflow_types::error::{ActivityError, LogError, RegistryError};
use docflow_types::job::{AttemptOutcome, Job, JobStatus, Stage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::log::ExecutionLog;
use crate::registry::ActivityRegistry;
use crate::retry::{RetryDecision, RetryPolicy};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Interval between probes while waiting out another in-flight attempt.
const PENDING_PROBE_INTERVAL_MS: u64 = 250;

/// Probe budget before a still-pending foreign attempt fails the job.
const PENDING_PROBE_LIMIT: u32 = 240;

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Per-job state machine. Generic over `L: ExecutionLog` so it runs against
/// SQLite in production and `MemoryLog` in tests.
pub struct Orchestrator<L: ExecutionLog> {
    log: Arc<L>,
    registry: Arc<ActivityRegistry>,
    config: PipelineConfig,
}

/// Result of driving a single stage to a conclusion.
enum StageRun {
    Completed(Value),
    Failed(String),
    Cancelled,
}

/// Result of allocating an attempt slot.
enum Allocation {
    /// A fresh attempt number was allocated.
    Attempt(u32),
    /// Another attempt finished with a success while we were waiting.
    AlreadyCompleted(Value),
}

impl<L: ExecutionLog> Orchestrator<L> {
    pub fn new(log: Arc<L>, registry: Arc<ActivityRegistry>, config: PipelineConfig) -> Self {
        Self {
            log,
            registry,
            config,
        }
    }

    /// Drive the job from its persisted cursor to a terminal status.
    ///
    /// Safe to call on a job in any state: a `Completed` job is returned
    /// untouched, and stages with recorded successes are skipped, so calling
    /// this after a crash resumes rather than restarts.
    pub async fn run_job(
        &self,
        job_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<Job, OrchestratorError> {
        let mut job = self
            .log
            .get_job(&job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))?;

        if job.status == JobStatus::Completed {
            return Ok(job);
        }

        let total = job.stages.len() as u32;
        tracing::info!(
            job_id = %job_id,
            from_stage = job.current_stage,
            "starting job execution"
        );

        self.log
            .update_job(&job_id, JobStatus::Running, job.current_stage, None, None)
            .await?;
        job.status = JobStatus::Running;

        let stage_timeout = Duration::from_secs(self.config.stage_timeout_secs);

        for idx in job.current_stage..total {
            if cancel.is_cancelled() {
                return self.mark_cancelled(&job).await;
            }

            let stage = job.stages[idx as usize];

            // Resume semantics: a stage with a recorded success is never
            // re-executed.
            let payload = match self.log.completed_outcome(&job_id, idx).await? {
                Some(payload) => {
                    tracing::debug!(job_id = %job_id, stage = %stage, "skipping completed stage");
                    payload
                }
                None => {
                    let input = job.output.clone().unwrap_or_else(|| job.input.clone());
                    let run = self
                        .run_stage(&job, idx, stage, input, stage_timeout, &cancel)
                        .await;

                    match run {
                        Ok(StageRun::Completed(payload)) => payload,
                        Ok(StageRun::Cancelled) => return self.mark_cancelled(&job).await,
                        Ok(StageRun::Failed(error)) => {
                            return self.mark_failed(&job, idx, stage, error).await;
                        }
                        Err(err) => {
                            // Consistency violations and storage errors also
                            // fail the job; the engine itself stays up.
                            let _ = self
                                .log
                                .update_job(
                                    &job_id,
                                    JobStatus::Failed,
                                    idx,
                                    None,
                                    Some(&err.to_string()),
                                )
                                .await;
                            return Err(err);
                        }
                    }
                }
            };

            // Advance the durable cursor before moving to the next stage.
            let next = idx + 1;
            let status = if next == total {
                JobStatus::Completed
            } else {
                JobStatus::Running
            };
            self.log
                .update_job(&job_id, status, next, Some(&payload), None)
                .await?;
            job.current_stage = next;
            job.status = status;
            job.output = Some(payload);
        }

        if job.status != JobStatus::Completed {
            // A resumed job whose cursor was already past the last stage.
            self.log
                .update_job(&job_id, JobStatus::Completed, total, None, None)
                .await?;
        }

        tracing::info!(job_id = %job_id, "job completed");
        self.log
            .get_job(&job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// Run one stage to a conclusion: retry loop around attempt allocation,
    /// activity invocation and outcome recording.
    async fn run_stage(
        &self,
        job: &Job,
        stage_index: u32,
        stage: Stage,
        input: Value,
        stage_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StageRun, OrchestratorError> {
        let policy = RetryPolicy::from_settings(self.config.retry_for(stage));
        let mut run_attempt: u32 = 0;

        loop {
            run_attempt += 1;
            if cancel.is_cancelled() {
                return Ok(StageRun::Cancelled);
            }

            let attempt = match self.allocate_attempt(job.id, stage_index).await? {
                Allocation::Attempt(n) => n,
                Allocation::AlreadyCompleted(payload) => {
                    return Ok(StageRun::Completed(payload));
                }
            };

            tracing::debug!(
                job_id = %job.id,
                stage = %stage,
                attempt,
                "invoking stage activity"
            );

            let invocation =
                tokio::time::timeout(stage_timeout, self.registry.invoke(stage, input.clone()))
                    .await;

            let error = match invocation {
                Ok(Ok(output)) => {
                    self.log
                        .record_outcome(
                            &job.id,
                            stage_index,
                            attempt,
                            &AttemptOutcome::Success {
                                payload: output.clone(),
                            },
                        )
                        .await?;
                    tracing::info!(
                        job_id = %job.id,
                        stage = %stage,
                        attempt,
                        "stage completed"
                    );
                    return Ok(StageRun::Completed(output));
                }
                Ok(Err(RegistryError::UnknownActivity { stage })) => {
                    // Registry misconfiguration is fatal: retrying cannot help.
                    let message = RegistryError::UnknownActivity { stage }.to_string();
                    self.log
                        .record_outcome(
                            &job.id,
                            stage_index,
                            attempt,
                            &AttemptOutcome::Failure {
                                error: message.clone(),
                            },
                        )
                        .await?;
                    return Ok(StageRun::Failed(message));
                }
                Ok(Err(RegistryError::Activity(err))) => err,
                Err(_elapsed) => ActivityError::Timeout,
            };

            let message = error.to_string();
            self.log
                .record_outcome(
                    &job.id,
                    stage_index,
                    attempt,
                    &AttemptOutcome::Failure {
                        error: message.clone(),
                    },
                )
                .await?;
            tracing::warn!(
                job_id = %job.id,
                stage = %stage,
                attempt,
                error = message.as_str(),
                "stage attempt failed"
            );

            match policy.next_action(run_attempt) {
                RetryDecision::Retry { after } => {
                    // Suspend without blocking other jobs; a cancellation
                    // observed here writes no further outcomes.
                    tokio::select! {
                        _ = tokio::time::sleep(after) => {}
                        _ = cancel.cancelled() => return Ok(StageRun::Cancelled),
                    }
                }
                RetryDecision::GiveUp => return Ok(StageRun::Failed(message)),
            }
        }
    }

    /// Allocate a pending attempt slot, handling the crash-recovery race.
    ///
    /// A `ConcurrentAttempt` error means another attempt is (or appears to
    /// be) in flight. Rather than starting a duplicate, wait and re-check:
    /// either the foreign attempt records a success we can use, or its
    /// pending slot frees up and allocation succeeds.
    async fn allocate_attempt(
        &self,
        job_id: Uuid,
        stage_index: u32,
    ) -> Result<Allocation, OrchestratorError> {
        let mut probes: u32 = 0;
        loop {
            match self.log.append_attempt(&job_id, stage_index).await {
                Ok(attempt) => return Ok(Allocation::Attempt(attempt)),
                Err(LogError::ConcurrentAttempt { .. }) => {
                    probes += 1;
                    if probes > PENDING_PROBE_LIMIT {
                        return Err(OrchestratorError::Log(LogError::ConcurrentAttempt {
                            job_id,
                            stage_index,
                        }));
                    }
                    tracing::debug!(
                        job_id = %job_id,
                        stage_index,
                        probes,
                        "pending attempt held elsewhere, waiting"
                    );
                    tokio::time::sleep(Duration::from_millis(PENDING_PROBE_INTERVAL_MS)).await;
                    if let Some(payload) =
                        self.log.completed_outcome(&job_id, stage_index).await?
                    {
                        return Ok(Allocation::AlreadyCompleted(payload));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn mark_failed(
        &self,
        job: &Job,
        stage_index: u32,
        stage: Stage,
        error: String,
    ) -> Result<Job, OrchestratorError> {
        self.log
            .update_job(&job.id, JobStatus::Failed, stage_index, None, Some(&error))
            .await?;
        tracing::error!(
            job_id = %job.id,
            stage = %stage,
            error = error.as_str(),
            "job failed"
        );
        Err(OrchestratorError::StageFailed {
            job_id: job.id,
            stage,
            error,
        })
    }

    async fn mark_cancelled(&self, job: &Job) -> Result<Job, OrchestratorError> {
        self.log
            .update_job(
                &job.id,
                JobStatus::Cancelled,
                job.current_stage,
                None,
                Some("cancelled"),
            )
            .await?;
        tracing::warn!(job_id = %job.id, "job cancelled");
        Err(OrchestratorError::Cancelled(job.id))
    }
}

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// Errors surfaced by job execution.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Execution log failure, including consistency violations
    /// (`UnknownAttempt` / `AlreadyRecorded`) that indicate a log bug.
    #[error("execution log error: {0}")]
    Log(#[from] LogError),

    /// The job reached its terminal `Failed` status.
    #[error("job {job_id} failed at stage '{stage}': {error}")]
    StageFailed {
        job_id: Uuid,
        stage: Stage,
        error: String,
    },

    /// Cancellation was observed; the job is marked `Cancelled`.
    #[error("job {0} cancelled")]
    Cancelled(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use docflow_types::config::RetrySettings;
    use serde_json::json;

    use super::*;
    use crate::log::MemoryLog;
    use crate::registry::Activity;

    /// Returns a fixed output and counts invocations.
    struct Scripted {
        output: Value,
        calls: Arc<AtomicU32>,
    }

    impl Scripted {
        fn new(output: Value) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    output,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Activity for Scripted {
        async fn run(&self, _input: Value) -> Result<Value, ActivityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    /// Fails the first `failures` invocations, then succeeds.
    struct FlakyUntil {
        failures: u32,
        output: Value,
        calls: Arc<AtomicU32>,
    }

    impl FlakyUntil {
        fn new(failures: u32, output: Value) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    failures,
                    output,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl Activity for FlakyUntil {
        async fn run(&self, _input: Value) -> Result<Value, ActivityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ActivityError::Service("service down".to_string()))
            } else {
                Ok(self.output.clone())
            }
        }
    }

    /// Sleeps past any reasonable stage timeout.
    struct Stuck;

    impl Activity for Stuck {
        async fn run(&self, _input: Value) -> Result<Value, ActivityError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        }
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            max_concurrent_jobs: 4,
            stage_timeout_secs: 60,
            retry: RetrySettings {
                initial_delay_ms: 10,
                max_attempts: 3,
            },
            stage_retry: HashMap::new(),
        }
    }

    async fn submit(log: &MemoryLog, input: Value) -> Uuid {
        let job = Job::new(input);
        let id = job.id;
        log.create_job(&job).await.unwrap();
        id
    }

    fn happy_registry() -> (Arc<ActivityRegistry>, Arc<AtomicU32>) {
        let mut registry = ActivityRegistry::new();
        let (extract, extract_calls) = Scripted::new(json!("hello world"));
        registry.register(Stage::Extract, extract);
        let (summarize, _) = Scripted::new(json!({"content": "a greeting"}));
        registry.register(Stage::Summarize, summarize);
        let (persist, _) = Scripted::new(json!("doc1.pdf-2026-08-07.txt"));
        registry.register(Stage::Persist, persist);
        (Arc::new(registry), extract_calls)
    }

    // -------------------------------------------------------------------
    // End-to-end happy path
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_happy_path_completes_with_final_output() {
        let log = Arc::new(MemoryLog::new());
        let (registry, _) = happy_registry();
        let orchestrator = Orchestrator::new(Arc::clone(&log), registry, test_config());

        let id = submit(&log, json!({"name": "doc1.pdf"})).await;
        let job = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.current_stage, 3);
        assert_eq!(job.output, Some(json!("doc1.pdf-2026-08-07.txt")));
        assert!(job.completed_at.is_some());

        // Exactly 3 success records, stage indices 0..3, one attempt each.
        let attempts = log.list_attempts(&id).await.unwrap();
        assert_eq!(attempts.len(), 3);
        for (idx, attempt) in attempts.iter().enumerate() {
            assert_eq!(attempt.stage_index, idx as u32);
            assert_eq!(attempt.attempt, 1);
            assert!(matches!(attempt.outcome, AttemptOutcome::Success { .. }));
        }
    }

    #[tokio::test]
    async fn test_stage_output_feeds_next_stage() {
        struct Push(&'static str);
        impl Activity for Push {
            async fn run(&self, input: Value) -> Result<Value, ActivityError> {
                let mut items = input.as_array().cloned().unwrap_or_default();
                items.push(json!(self.0));
                Ok(Value::Array(items))
            }
        }

        let mut registry = ActivityRegistry::new();
        registry.register(Stage::Extract, Push("extract"));
        registry.register(Stage::Summarize, Push("summarize"));
        registry.register(Stage::Persist, Push("persist"));

        let log = Arc::new(MemoryLog::new());
        let orchestrator =
            Orchestrator::new(Arc::clone(&log), Arc::new(registry), test_config());

        let id = submit(&log, json!(["input"])).await;
        let job = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap();

        // Stage 0 saw the job input; each later stage saw its predecessor.
        assert_eq!(
            job.output,
            Some(json!(["input", "extract", "summarize", "persist"]))
        );
    }

    // -------------------------------------------------------------------
    // Failure path and bounded retry
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_exhausted_retries_fail_job_and_skip_later_stages() {
        let log = Arc::new(MemoryLog::new());
        let mut registry = ActivityRegistry::new();
        let (extract, _) = FlakyUntil::new(u32::MAX, json!(null));
        registry.register(Stage::Extract, extract);
        let (summarize, summarize_calls) = Scripted::new(json!(null));
        registry.register(Stage::Summarize, summarize);
        let (persist, persist_calls) = Scripted::new(json!(null));
        registry.register(Stage::Persist, persist);

        let orchestrator =
            Orchestrator::new(Arc::clone(&log), Arc::new(registry), test_config());
        let id = submit(&log, json!({"name": "doc1.pdf"})).await;

        let err = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            OrchestratorError::StageFailed { stage, error, .. } => {
                assert_eq!(stage, Stage::Extract);
                assert!(error.contains("service down"));
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }

        let job = log.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("service down"));

        // Exactly 3 failure attempts for stage 0, never a 4th; stages 1-2
        // were never reached.
        let attempts = log.list_attempts(&id).await.unwrap();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.stage_index == 0));
        assert!(
            attempts
                .iter()
                .all(|a| matches!(a.outcome, AttemptOutcome::Failure { .. }))
        );
        assert_eq!(summarize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(persist_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_budget() {
        let log = Arc::new(MemoryLog::new());
        let mut registry = ActivityRegistry::new();
        let (extract, _) = FlakyUntil::new(2, json!("hello world"));
        registry.register(Stage::Extract, extract);
        let (summarize, _) = Scripted::new(json!({"content": "a greeting"}));
        registry.register(Stage::Summarize, summarize);
        let (persist, _) = Scripted::new(json!("out.txt"));
        registry.register(Stage::Persist, persist);

        let orchestrator =
            Orchestrator::new(Arc::clone(&log), Arc::new(registry), test_config());
        let id = submit(&log, json!({"name": "doc1.pdf"})).await;

        let job = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let attempts = log.list_attempts(&id).await.unwrap();
        let stage0: Vec<_> = attempts.iter().filter(|a| a.stage_index == 0).collect();
        assert_eq!(stage0.len(), 3);
        assert!(matches!(
            stage0[2].outcome,
            AttemptOutcome::Success { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_activity_fails_without_retry() {
        let log = Arc::new(MemoryLog::new());
        let mut registry = ActivityRegistry::new();
        let (extract, _) = Scripted::new(json!("hello world"));
        registry.register(Stage::Extract, extract);
        // Summarize deliberately unregistered.
        let (persist, persist_calls) = Scripted::new(json!(null));
        registry.register(Stage::Persist, persist);

        let orchestrator =
            Orchestrator::new(Arc::clone(&log), Arc::new(registry), test_config());
        let id = submit(&log, json!({"name": "doc1.pdf"})).await;

        let err = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::StageFailed {
                stage: Stage::Summarize,
                ..
            }
        ));

        // One attempt only: misconfiguration is not retried.
        let attempts = log.list_attempts(&id).await.unwrap();
        let stage1: Vec<_> = attempts.iter().filter(|a| a.stage_index == 1).collect();
        assert_eq!(stage1.len(), 1);
        assert_eq!(persist_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_counts_as_failed_attempt() {
        let log = Arc::new(MemoryLog::new());
        let mut registry = ActivityRegistry::new();
        registry.register(Stage::Extract, Stuck);

        let mut config = test_config();
        config.stage_timeout_secs = 1;
        config.retry.max_attempts = 1;

        let orchestrator = Orchestrator::new(Arc::clone(&log), Arc::new(registry), config);
        let id = submit(&log, json!({"name": "doc1.pdf"})).await;

        let err = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            OrchestratorError::StageFailed { error, .. } => {
                assert!(error.contains("timed out"));
            }
            other => panic!("expected StageFailed, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Idempotent resume
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_resume_never_reruns_completed_stage() {
        let log = Arc::new(MemoryLog::new());

        // First run: extract succeeds, summarize exhausts its retries.
        let mut registry = ActivityRegistry::new();
        let (extract, extract_calls) = Scripted::new(json!("hello world"));
        registry.register(Stage::Extract, extract);
        let (summarize, _) = FlakyUntil::new(u32::MAX, json!(null));
        registry.register(Stage::Summarize, summarize);
        let (persist, _) = Scripted::new(json!("out.txt"));
        registry.register(Stage::Persist, persist);

        let orchestrator =
            Orchestrator::new(Arc::clone(&log), Arc::new(registry), test_config());
        let id = submit(&log, json!({"name": "doc1.pdf"})).await;
        orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(extract_calls.load(Ordering::SeqCst), 1);

        // Second run with a healthy summarize activity: the job completes
        // and extract is not invoked again.
        let mut registry = ActivityRegistry::new();
        let (extract, extract_calls_2) = Scripted::new(json!("hello world"));
        registry.register(Stage::Extract, extract);
        let (summarize, _) = Scripted::new(json!({"content": "a greeting"}));
        registry.register(Stage::Summarize, summarize);
        let (persist, _) = Scripted::new(json!("out.txt"));
        registry.register(Stage::Persist, persist);

        let orchestrator =
            Orchestrator::new(Arc::clone(&log), Arc::new(registry), test_config());
        let job = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(extract_calls_2.load(Ordering::SeqCst), 0);

        // The log still contains exactly one success attempt for stage 0.
        let attempts = log.list_attempts(&id).await.unwrap();
        let stage0_success = attempts
            .iter()
            .filter(|a| {
                a.stage_index == 0 && matches!(a.outcome, AttemptOutcome::Success { .. })
            })
            .count();
        assert_eq!(stage0_success, 1);
    }

    #[tokio::test]
    async fn test_completed_job_returns_without_side_effects() {
        let log = Arc::new(MemoryLog::new());
        let (registry, extract_calls) = happy_registry();
        let orchestrator = Orchestrator::new(Arc::clone(&log), registry, test_config());

        let id = submit(&log, json!({"name": "doc1.pdf"})).await;
        orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(extract_calls.load(Ordering::SeqCst), 1);

        let job = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(extract_calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.list_attempts(&id).await.unwrap().len(), 3);
    }

    // -------------------------------------------------------------------
    // Concurrent attempt recovery
    // -------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_pending_attempt_held_elsewhere_waits_for_its_outcome() {
        let log = Arc::new(MemoryLog::new());
        let (registry, extract_calls) = happy_registry();
        let orchestrator = Orchestrator::new(Arc::clone(&log), registry, test_config());

        let id = submit(&log, json!({"name": "doc1.pdf"})).await;

        // Simulate another worker holding the pending slot for stage 0 and
        // recording its success a little later.
        let foreign_attempt = log.append_attempt(&id, 0).await.unwrap();
        let recorder_log = Arc::clone(&log);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            recorder_log
                .record_outcome(
                    &id,
                    0,
                    foreign_attempt,
                    &AttemptOutcome::Success {
                        payload: json!("hello world"),
                    },
                )
                .await
                .unwrap();
        });

        let job = orchestrator
            .run_job(id, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        // The foreign attempt's payload was used; our extract never ran.
        assert_eq!(extract_calls.load(Ordering::SeqCst), 0);
        let attempts = log.list_attempts(&id).await.unwrap();
        let stage0: Vec<_> = attempts.iter().filter(|a| a.stage_index == 0).collect();
        assert_eq!(stage0.len(), 1);
    }

    // -------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancelled_before_start_records_no_attempts() {
        let log = Arc::new(MemoryLog::new());
        let (registry, extract_calls) = happy_registry();
        let orchestrator = Orchestrator::new(Arc::clone(&log), registry, test_config());

        let id = submit(&log, json!({"name": "doc1.pdf"})).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator.run_job(id, cancel).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled(_)));

        let job = log.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(log.list_attempts(&id).await.unwrap().is_empty());
        assert_eq!(extract_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_delay_stops_the_job() {
        let log = Arc::new(MemoryLog::new());
        let mut registry = ActivityRegistry::new();
        let (extract, _) = FlakyUntil::new(u32::MAX, json!(null));
        registry.register(Stage::Extract, extract);

        let mut config = test_config();
        config.retry.initial_delay_ms = 5_000;

        let orchestrator = Orchestrator::new(Arc::clone(&log), Arc::new(registry), config);
        let id = submit(&log, json!({"name": "doc1.pdf"})).await;

        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trip.cancel();
        });

        let err = orchestrator.run_job(id, cancel).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled(_)));

        // One failure was recorded before the cancel; no outcome after it.
        let attempts = log.list_attempts(&id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(matches!(
            attempts[0].outcome,
            AttemptOutcome::Failure { .. }
        ));
        let job = log.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
