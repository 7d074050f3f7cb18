//! CLI job subcommand handlers.
//!
//! Provides submit, watch, list, status, logs and resume operations over
//! the pipeline's execution log.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use docflow_core::log::ExecutionLog;
use docflow_core::orchestrator::OrchestratorError;
use docflow_infra::store::{Container, document_name};
use docflow_infra::watch::start_document_watcher;
use docflow_types::job::{AttemptOutcome, Job, JobStatus};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Copy a document into the input container and submit a job for it.
pub async fn submit(state: &AppState, file: &Path, wait: bool, json: bool) -> Result<()> {
    let name = document_name(file)
        .with_context(|| format!("'{}' has no file name", file.display()))?
        .to_string();

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read '{}'", file.display()))?;
    state
        .store
        .put(Container::Input, &name, &bytes)
        .await
        .context("failed to copy document into the input container")?;

    let payload = serde_json::json!({"name": name});
    let job_id = if wait {
        // Inline execution: create without scheduling so the job runs
        // exactly once, in this call.
        state.dispatcher.create(payload).await
    } else {
        state.dispatcher.submit(payload).await
    }
    .context("failed to submit job")?;

    if !wait {
        if json {
            let out = serde_json::json!({"job_id": job_id.to_string(), "name": name});
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!();
            println!(
                "  {} Submitted job {} for '{}'",
                style("*").green().bold(),
                style(job_id).cyan(),
                name
            );
            println!();
        }
        return Ok(());
    }

    match state.dispatcher.execute(job_id).await {
        Ok(job) => print_job(&job, json),
        Err(OrchestratorError::StageFailed { stage, error, .. }) => {
            bail!("job failed at stage '{stage}': {error}")
        }
        Err(err) => bail!("job did not complete: {err}"),
    }
}

// ---------------------------------------------------------------------------
// Watch
// ---------------------------------------------------------------------------

/// Recover interrupted jobs, then watch the input container and submit a
/// job for each new document until interrupted.
pub async fn watch(state: &AppState) -> Result<()> {
    let recovered = state
        .dispatcher
        .recover()
        .await
        .context("crash-recovery sweep failed")?;
    if !recovered.is_empty() {
        println!(
            "  {} Resumed {} interrupted job(s)",
            style("*").yellow().bold(),
            recovered.len()
        );
    }

    let input_dir = state.store.container_dir(Container::Input);
    let (_handle, mut events) =
        start_document_watcher(&input_dir, vec!["pdf".to_string()], None)
            .context("failed to start input watcher")?;

    println!(
        "  {} Watching {} (ctrl-c to stop)",
        style("*").green().bold(),
        style(input_dir.display()).cyan()
    );

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match state.dispatcher.submit(event.to_payload()).await {
                    Ok(job_id) => {
                        println!(
                            "  {} {} -> job {}",
                            style("+").green(),
                            event.name,
                            style(job_id).cyan()
                        );
                    }
                    Err(err) => {
                        eprintln!("  {} failed to submit '{}': {err}", style("!").red(), event.name);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("  {} Stopping watcher", style("*").yellow().bold());
                break;
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// List recent jobs.
pub async fn list(state: &AppState, limit: u32, json: bool) -> Result<()> {
    let jobs = state
        .dispatcher
        .execution_log()
        .list_jobs(limit)
        .await
        .context("failed to list jobs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!();
        println!("  No jobs yet. Try 'docflow submit <file.pdf>'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "STATUS", "STAGE", "CREATED", "ERROR"]);

    for job in &jobs {
        let stage = format!("{}/{}", job.current_stage, job.stages.len());
        table.add_row(vec![
            Cell::new(job.id),
            status_cell(job.status),
            Cell::new(stage),
            Cell::new(job.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(job.error.as_deref().unwrap_or("-")),
        ]);
    }

    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Show a single job's record.
pub async fn status(state: &AppState, job_id: &str, json: bool) -> Result<()> {
    let job = fetch_job(state, job_id).await?;
    print_job(&job, json)
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Show the attempt log for a job.
pub async fn logs(state: &AppState, job_id: &str, json: bool) -> Result<()> {
    let job = fetch_job(state, job_id).await?;
    let attempts = state
        .dispatcher
        .execution_log()
        .list_attempts(&job.id)
        .await
        .context("failed to load attempts")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&attempts)?);
        return Ok(());
    }

    if attempts.is_empty() {
        println!();
        println!("  No attempts recorded for job {}.", job.id);
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["STAGE", "ATTEMPT", "OUTCOME", "STARTED", "DETAIL"]);

    for attempt in &attempts {
        let stage = job
            .stages
            .get(attempt.stage_index as usize)
            .map(|s| s.to_string())
            .unwrap_or_else(|| attempt.stage_index.to_string());

        let (outcome, detail) = match &attempt.outcome {
            AttemptOutcome::Pending => (Cell::new("pending").fg(Color::Yellow), "-".to_string()),
            AttemptOutcome::Success { payload } => (
                Cell::new("success").fg(Color::Green),
                truncate(&payload.to_string(), 48),
            ),
            AttemptOutcome::Failure { error } => {
                (Cell::new("failure").fg(Color::Red), truncate(error, 48))
            }
        };

        table.add_row(vec![
            Cell::new(stage),
            Cell::new(attempt.attempt),
            outcome,
            Cell::new(attempt.started_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(detail),
        ]);
    }

    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

/// Re-drive a job from its last completed stage.
pub async fn resume(state: &AppState, job_id: &str, json: bool) -> Result<()> {
    let job = fetch_job(state, job_id).await?;
    if job.status == JobStatus::Completed {
        bail!("job {} is already completed", job.id);
    }

    match state.dispatcher.execute(job.id).await {
        Ok(job) => print_job(&job, json),
        Err(OrchestratorError::StageFailed { stage, error, .. }) => {
            bail!("job failed again at stage '{stage}': {error}")
        }
        Err(err) => bail!("resume failed: {err}"),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn fetch_job(state: &AppState, job_id: &str) -> Result<Job> {
    let id: Uuid = job_id
        .parse()
        .with_context(|| format!("'{job_id}' is not a valid job ID"))?;
    state
        .dispatcher
        .execution_log()
        .get_job(&id)
        .await
        .context("failed to load job")?
        .with_context(|| format!("job {id} not found"))
}

fn print_job(job: &Job, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Job {}",
        style("*").bold(),
        style(job.id).cyan()
    );
    println!("  Status: {}", styled_status(job.status));
    println!("  Stage: {}/{}", job.current_stage, job.stages.len());
    println!("  Input: {}", job.input);
    if let Some(output) = &job.output {
        println!("  Output: {output}");
    }
    if let Some(error) = &job.error {
        println!("  Error: {}", style(error).red());
    }
    println!("  Created: {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed_at) = &job.completed_at {
        println!("  Finished: {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!();
    Ok(())
}

fn styled_status(status: JobStatus) -> String {
    let text = status.to_string();
    match status {
        JobStatus::Completed => style(text).green().to_string(),
        JobStatus::Failed => style(text).red().to_string(),
        JobStatus::Running => style(text).yellow().to_string(),
        JobStatus::Cancelled => style(text).dim().to_string(),
        JobStatus::Pending => style(text).blue().to_string(),
    }
}

fn status_cell(status: JobStatus) -> Cell {
    let cell = Cell::new(status);
    match status {
        JobStatus::Completed => cell.fg(Color::Green),
        JobStatus::Failed => cell.fg(Color::Red),
        JobStatus::Running => cell.fg(Color::Yellow),
        JobStatus::Cancelled => cell.fg(Color::DarkGrey),
        JobStatus::Pending => cell.fg(Color::Blue),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}
