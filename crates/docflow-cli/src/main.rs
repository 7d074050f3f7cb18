//! Docflow CLI entry point.
//!
//! Binary name: `docflow`
//!
//! Parses CLI arguments, initializes the database and dispatcher, then
//! dispatches to the appropriate subcommand handler.

mod job;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use state::AppState;

/// Durable document summarization pipeline.
#[derive(Parser)]
#[command(name = "docflow", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit machine-readable JSON instead of styled output.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors.
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a document into the input container and submit a job for it.
    Submit {
        /// Path to the document (e.g. a PDF).
        file: PathBuf,

        /// Run the job to completion instead of returning immediately.
        #[arg(long)]
        wait: bool,
    },

    /// Watch the input container and submit a job for each new document.
    ///
    /// Also resumes any jobs a previous worker left unfinished.
    Watch,

    /// List recent jobs.
    List {
        /// Maximum number of jobs to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Show a job's record.
    Status {
        /// Job UUID.
        job_id: String,
    },

    /// Show the attempt log for a job.
    Logs {
        /// Job UUID.
        job_id: String,
    },

    /// Resume an interrupted or failed job from its last completed stage.
    Resume {
        /// Job UUID.
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,docflow=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let state = AppState::init().await?;
    tracing::debug!(
        data_dir = %state.data_dir.display(),
        model = state.config.summarization.model.as_str(),
        "state initialized"
    );

    match cli.command {
        Commands::Submit { file, wait } => {
            job::submit(&state, &file, wait, cli.json).await?;
        }
        Commands::Watch => {
            job::watch(&state).await?;
        }
        Commands::List { limit } => {
            job::list(&state, limit, cli.json).await?;
        }
        Commands::Status { job_id } => {
            job::status(&state, &job_id, cli.json).await?;
        }
        Commands::Logs { job_id } => {
            job::logs(&state, &job_id, cli.json).await?;
        }
        Commands::Resume { job_id } => {
            job::resume(&state, &job_id, cli.json).await?;
        }
    }

    Ok(())
}
