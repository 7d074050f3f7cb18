//! SQLite execution log implementation.
//!
//! Implements `ExecutionLog` from `docflow-core` using sqlx with the split
//! read/write pools. The log's two invariants are enforced at the SQL
//! layer so they hold across processes, not just within one:
//!
//! - **At most one pending attempt** per `(job_id, stage_index)`: a partial
//!   UNIQUE index over pending rows makes the second concurrent
//!   `append_attempt` fail with a unique violation, surfaced as
//!   `LogError::ConcurrentAttempt`.
//! - **Write-once outcomes**: `record_outcome` updates only rows still in
//!   the `pending` state; zero affected rows distinguishes `AlreadyRecorded`
//!   from `UnknownAttempt`.
//!
//! Attempt numbers are allocated inside the INSERT itself
//! (`COALESCE(MAX(attempt), 0) + 1`), which the single-writer pool
//! serializes.

use chrono::{DateTime, Utc};
use docflow_core::log::ExecutionLog;
use docflow_types::error::LogError;
use docflow_types::job::{AttemptOutcome, Job, JobStatus, Stage, StageAttempt};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionLog`.
pub struct SqliteExecutionLog {
    pool: DatabasePool,
}

impl SqliteExecutionLog {
    /// Create a new execution log backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct JobRow {
    id: String,
    status: String,
    stages: String,
    current_stage: i64,
    input: String,
    output: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            status: row.try_get("status")?,
            stages: row.try_get("stages")?,
            current_stage: row.try_get("current_stage")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_job(self) -> Result<Job, LogError> {
        let id = parse_uuid(&self.id)?;

        let status: JobStatus =
            serde_json::from_value(Value::String(self.status.clone()))
                .map_err(|_| LogError::Storage(format!("invalid job status: {}", self.status)))?;

        let stages: Vec<Stage> = serde_json::from_str(&self.stages)
            .map_err(|e| LogError::Storage(format!("invalid stages JSON: {e}")))?;

        let input: Value = serde_json::from_str(&self.input)
            .map_err(|e| LogError::Storage(format!("invalid input JSON: {e}")))?;

        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| LogError::Storage(format!("invalid output JSON: {e}")))
            })
            .transpose()?;

        let created_at = parse_datetime(&self.created_at)?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(Job {
            id,
            stages,
            current_stage: self.current_stage as u32,
            status,
            input,
            output,
            error: self.error,
            created_at,
            completed_at,
        })
    }
}

struct AttemptRow {
    job_id: String,
    stage_index: i64,
    attempt: i64,
    outcome: String,
    payload: Option<String>,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl AttemptRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            job_id: row.try_get("job_id")?,
            stage_index: row.try_get("stage_index")?,
            attempt: row.try_get("attempt")?,
            outcome: row.try_get("outcome")?,
            payload: row.try_get("payload")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_attempt(self) -> Result<StageAttempt, LogError> {
        let job_id = parse_uuid(&self.job_id)?;

        let outcome = match self.outcome.as_str() {
            "pending" => AttemptOutcome::Pending,
            "success" => {
                let payload = self
                    .payload
                    .as_deref()
                    .map(|s| {
                        serde_json::from_str(s).map_err(|e| {
                            LogError::Storage(format!("invalid payload JSON: {e}"))
                        })
                    })
                    .transpose()?
                    .unwrap_or(Value::Null);
                AttemptOutcome::Success { payload }
            }
            "failure" => AttemptOutcome::Failure {
                error: self.error.clone().unwrap_or_default(),
            },
            other => {
                return Err(LogError::Storage(format!("invalid outcome: {other}")));
            }
        };

        let started_at = parse_datetime(&self.started_at)?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(StageAttempt {
            job_id,
            stage_index: self.stage_index as u32,
            attempt: self.attempt as u32,
            outcome,
            started_at,
            completed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, LogError> {
    s.parse::<Uuid>()
        .map_err(|e| LogError::Storage(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, LogError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LogError::Storage(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn storage_err(e: sqlx::Error) -> LogError {
    LogError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// ExecutionLog impl
// ---------------------------------------------------------------------------

impl ExecutionLog for SqliteExecutionLog {
    async fn create_job(&self, job: &Job) -> Result<(), LogError> {
        let stages = serde_json::to_string(&job.stages)
            .map_err(|e| LogError::Storage(format!("serialize stages: {e}")))?;
        let input = serde_json::to_string(&job.input)
            .map_err(|e| LogError::Storage(format!("serialize input: {e}")))?;
        let output = job
            .output
            .as_ref()
            .map(|v| {
                serde_json::to_string(v)
                    .map_err(|e| LogError::Storage(format!("serialize output: {e}")))
            })
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, stages, current_stage, input, output, error, created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.to_string())
        .bind(stages)
        .bind(job.current_stage as i64)
        .bind(input)
        .bind(output)
        .bind(&job.error)
        .bind(format_datetime(&job.created_at))
        .bind(job.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn get_job(&self, job_id: &Uuid) -> Result<Option<Job>, LogError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, stages, current_stage, input, output, error, created_at, completed_at
            FROM jobs
            WHERE id = ?1
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(storage_err)?;

        row.map(|r| JobRow::from_row(&r).map_err(storage_err)?.into_job())
            .transpose()
    }

    async fn update_job(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        current_stage: u32,
        output: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), LogError> {
        let output = output
            .map(|v| {
                serde_json::to_string(v)
                    .map_err(|e| LogError::Storage(format!("serialize output: {e}")))
            })
            .transpose()?;
        let completed_at = status.is_terminal().then(|| format_datetime(&Utc::now()));

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                current_stage = ?2,
                output = COALESCE(?3, output),
                error = COALESCE(?4, error),
                completed_at = COALESCE(?5, completed_at)
            WHERE id = ?6
            "#,
        )
        .bind(status.to_string())
        .bind(current_stage as i64)
        .bind(output)
        .bind(error)
        .bind(completed_at)
        .bind(job_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(LogError::JobNotFound(*job_id));
        }
        Ok(())
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>, LogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, stages, current_stage, input, output, error, created_at, completed_at
            FROM jobs
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| JobRow::from_row(r).map_err(storage_err)?.into_job())
            .collect()
    }

    async fn list_interrupted_jobs(&self) -> Result<Vec<Job>, LogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, stages, current_stage, input, output, error, created_at, completed_at
            FROM jobs
            WHERE status IN ('pending', 'running')
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| JobRow::from_row(r).map_err(storage_err)?.into_job())
            .collect()
    }

    async fn append_attempt(&self, job_id: &Uuid, stage_index: u32) -> Result<u32, LogError> {
        // Attempt allocation and the pending guard happen inside one INSERT
        // so the single-writer pool serializes them.
        let result = sqlx::query(
            r#"
            INSERT INTO stage_attempts (job_id, stage_index, attempt, outcome, started_at)
            SELECT ?1, ?2, COALESCE(MAX(attempt), 0) + 1, 'pending', ?3
            FROM stage_attempts
            WHERE job_id = ?1 AND stage_index = ?2
            RETURNING attempt
            "#,
        )
        .bind(job_id.to_string())
        .bind(stage_index as i64)
        .bind(format_datetime(&Utc::now()))
        .fetch_one(&self.pool.writer)
        .await;

        match result {
            Ok(row) => {
                let attempt: i64 = row.try_get("attempt").map_err(storage_err)?;
                Ok(attempt as u32)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // The PK cannot collide (attempt is allocated in-statement),
                // so a unique violation is the partial pending index.
                Err(LogError::ConcurrentAttempt {
                    job_id: *job_id,
                    stage_index,
                })
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                Err(LogError::JobNotFound(*job_id))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn record_outcome(
        &self,
        job_id: &Uuid,
        stage_index: u32,
        attempt: u32,
        outcome: &AttemptOutcome,
    ) -> Result<(), LogError> {
        let (outcome_str, payload, error) = match outcome {
            AttemptOutcome::Success { payload } => {
                let payload = serde_json::to_string(payload)
                    .map_err(|e| LogError::Storage(format!("serialize payload: {e}")))?;
                ("success", Some(payload), None)
            }
            AttemptOutcome::Failure { error } => ("failure", None, Some(error.as_str())),
            AttemptOutcome::Pending => {
                return Err(LogError::Storage(
                    "recorded outcome must be terminal".to_string(),
                ));
            }
        };

        let result = sqlx::query(
            r#"
            UPDATE stage_attempts
            SET outcome = ?1, payload = ?2, error = ?3, completed_at = ?4
            WHERE job_id = ?5 AND stage_index = ?6 AND attempt = ?7 AND outcome = 'pending'
            "#,
        )
        .bind(outcome_str)
        .bind(payload)
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(job_id.to_string())
        .bind(stage_index as i64)
        .bind(attempt as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            // Distinguish "attempt never appended" from "already terminal".
            let exists: Option<(i64,)> = sqlx::query_as(
                r#"
                SELECT 1 FROM stage_attempts
                WHERE job_id = ?1 AND stage_index = ?2 AND attempt = ?3
                "#,
            )
            .bind(job_id.to_string())
            .bind(stage_index as i64)
            .bind(attempt as i64)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_err)?;

            return Err(if exists.is_some() {
                LogError::AlreadyRecorded {
                    job_id: *job_id,
                    stage_index,
                    attempt,
                }
            } else {
                LogError::UnknownAttempt {
                    job_id: *job_id,
                    stage_index,
                    attempt,
                }
            });
        }

        Ok(())
    }

    async fn completed_outcome(
        &self,
        job_id: &Uuid,
        stage_index: u32,
    ) -> Result<Option<Value>, LogError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT payload FROM stage_attempts
            WHERE job_id = ?1 AND stage_index = ?2 AND outcome = 'success'
            LIMIT 1
            "#,
        )
        .bind(job_id.to_string())
        .bind(stage_index as i64)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(storage_err)?;

        match row {
            None => Ok(None),
            Some((None,)) => Ok(Some(Value::Null)),
            Some((Some(payload),)) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|e| LogError::Storage(format!("invalid payload JSON: {e}"))),
        }
    }

    async fn list_attempts(&self, job_id: &Uuid) -> Result<Vec<StageAttempt>, LogError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, stage_index, attempt, outcome, payload, error, started_at, completed_at
            FROM stage_attempts
            WHERE job_id = ?1
            ORDER BY stage_index ASC, attempt ASC
            "#,
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|r| AttemptRow::from_row(r).map_err(storage_err)?.into_attempt())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
