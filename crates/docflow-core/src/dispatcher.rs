//! Job dispatcher -- creates jobs on triggers and schedules the orchestrator.
//!
//! One job per trigger event, no deduplication of identical inputs. The
//! dispatcher owns the per-job cancellation tokens and the global
//! concurrency limit; the orchestrator owns everything else. On worker
//! start, `recover` sweeps jobs a previous process left unfinished and
//! re-drives them through the resume path.

use std::sync::Arc;

use dashmap::DashMap;
use docflow_types::config::PipelineConfig;
use docflow_types::job::Job;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::log::ExecutionLog;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::registry::ActivityRegistry;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Creates job instances and hands them to the orchestrator.
pub struct Dispatcher<L: ExecutionLog + 'static> {
    log: Arc<L>,
    orchestrator: Arc<Orchestrator<L>>,
    permits: Arc<Semaphore>,
    cancel_tokens: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<L: ExecutionLog + 'static> Dispatcher<L> {
    pub fn new(log: Arc<L>, registry: Arc<ActivityRegistry>, config: PipelineConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1) as usize));
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&log), registry, config));
        Self {
            log,
            orchestrator,
            permits,
            cancel_tokens: Arc::new(DashMap::new()),
        }
    }

    /// Create a new pending job record without scheduling it.
    ///
    /// Callers that want to drive the job themselves follow up with
    /// [`Dispatcher::execute`].
    pub async fn create(&self, initial_input: Value) -> Result<Uuid, DispatchError> {
        let job = Job::new(initial_input);
        let job_id = job.id;
        self.log.create_job(&job).await?;
        tracing::info!(job_id = %job_id, "job created");
        Ok(job_id)
    }

    /// Create a new pending job and schedule it in the background.
    ///
    /// Returns as soon as the job record is durable; execution proceeds on
    /// its own task. Each trigger event yields an independent job.
    pub async fn submit(&self, initial_input: Value) -> Result<Uuid, DispatchError> {
        let job_id = self.create(initial_input).await?;
        self.spawn_run(job_id);
        Ok(job_id)
    }

    /// Run a job inline to a terminal status and return the final record.
    ///
    /// This is the resume entry point: completed stages are skipped via the
    /// execution log, so calling it on an interrupted (or deliberately
    /// re-driven) job picks up where the previous run stopped.
    pub async fn execute(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("dispatcher semaphore closed");

        let cancel = CancellationToken::new();
        self.cancel_tokens.insert(job_id, cancel.clone());
        let result = self.orchestrator.run_job(job_id, cancel).await;
        self.cancel_tokens.remove(&job_id);
        result
    }

    /// Sweep jobs a previous worker left unfinished and re-schedule each.
    ///
    /// Returns the IDs of the jobs that were re-dispatched.
    pub async fn recover(&self) -> Result<Vec<Uuid>, DispatchError> {
        let interrupted = self.log.list_interrupted_jobs().await?;
        let mut resumed = Vec::with_capacity(interrupted.len());
        for job in interrupted {
            // Jobs currently tracked by this process are not crash leftovers.
            if self.cancel_tokens.contains_key(&job.id) {
                continue;
            }
            tracing::info!(
                job_id = %job.id,
                from_stage = job.current_stage,
                "recovering interrupted job"
            );
            self.spawn_run(job.id);
            resumed.push(job.id);
        }
        Ok(resumed)
    }

    /// Trip a running job's cancellation token.
    ///
    /// Returns `false` when the job is not executing in this process.
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        if let Some(entry) = self.cancel_tokens.get(job_id) {
            entry.value().cancel();
            true
        } else {
            false
        }
    }

    /// Number of jobs currently executing in this process.
    pub fn active_jobs(&self) -> usize {
        self.cancel_tokens.len()
    }

    /// The execution log this dispatcher writes through.
    pub fn execution_log(&self) -> &Arc<L> {
        &self.log
    }

    fn spawn_run(&self, job_id: Uuid) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let permits = Arc::clone(&self.permits);
        let cancel_tokens = Arc::clone(&self.cancel_tokens);

        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .expect("dispatcher semaphore closed");

            let cancel = CancellationToken::new();
            cancel_tokens.insert(job_id, cancel.clone());

            match orchestrator.run_job(job_id, cancel).await {
                Ok(job) => {
                    tracing::debug!(job_id = %job_id, status = %job.status, "job task finished");
                }
                Err(OrchestratorError::Cancelled(_)) => {}
                Err(err) => {
                    // The failure is already durable on the job record; a
                    // failed job must not take the worker down.
                    tracing::error!(job_id = %job_id, error = %err, "job task failed");
                }
            }

            cancel_tokens.remove(&job_id);
        });
    }
}

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Errors from job submission and recovery.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("execution log error: {0}")]
    Log(#[from] docflow_types::error::LogError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
