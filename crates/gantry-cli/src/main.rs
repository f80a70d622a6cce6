//! Gantry - declarative build pipeline runner
//!
//! The `gantry` command executes a Travis-style job declaration: it expands
//! the interpreter-version matrix, runs the phased shell commands per
//! environment, and applies branch, deploy, and notification gating.
//!
//! ## Commands
//!
//! - `run`: execute a declaration for a branch; exits non-zero on failure
//! - `validate`: parse and validate a declaration
//! - `matrix`: print the expanded environment matrix

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gantry_domain::JobSpec;
use gantry_pipeline::{
    expand_matrix, init_tracing, render_text, DirectoryPublisher, FsStatusStore, LogNotifier,
    Pipeline, ShellRunner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author = "Gantry Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative build pipeline runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline declaration
    Run {
        /// Path to the job declaration (YAML)
        #[arg(short, long, default_value = ".gantry.yml")]
        file: PathBuf,

        /// Source-control branch the run was triggered from
        #[arg(short, long, env = "GANTRY_BRANCH", default_value = "master")]
        branch: String,

        /// Per-command wall-clock timeout in seconds (0 disables the bound)
        #[arg(long, default_value = "2400")]
        timeout_secs: u64,

        /// Status history file consulted by the notification policy
        #[arg(long, default_value = ".gantry/status.json")]
        status_file: PathBuf,

        /// Root directory the deploy target publishes into
        #[arg(long, default_value = ".gantry/deploy")]
        target_dir: PathBuf,
    },

    /// Parse and validate a declaration
    Validate {
        /// Path to the job declaration (YAML)
        #[arg(short, long, default_value = ".gantry.yml")]
        file: PathBuf,
    },

    /// Print the expanded environment matrix
    Matrix {
        /// Path to the job declaration (YAML)
        #[arg(short, long, default_value = ".gantry.yml")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            file,
            branch,
            timeout_secs,
            status_file,
            target_dir,
        } => cmd_run(&file, &branch, timeout_secs, status_file, target_dir).await,
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Matrix { file } => cmd_matrix(&file),
    }
}

async fn cmd_run(
    file: &Path,
    branch: &str,
    timeout_secs: u64,
    status_file: PathBuf,
    target_dir: PathBuf,
) -> Result<()> {
    let spec = JobSpec::from_path(file)
        .with_context(|| format!("failed to load declaration {}", file.display()))?;

    let pipeline = Pipeline::new(
        Arc::new(ShellRunner::new(timeout_secs)),
        Arc::new(DirectoryPublisher::new(target_dir)),
        Arc::new(LogNotifier::new()),
        Arc::new(FsStatusStore::new(status_file)),
    );

    let outcome = pipeline
        .run(&spec, branch)
        .await
        .context("pipeline run failed")?;

    print!("{}", render_text(&outcome));

    // A failing run always surfaces as a non-zero process exit code,
    // regardless of best-effort failures.
    std::process::exit(outcome.exit_code());
}

fn cmd_validate(file: &Path) -> Result<()> {
    let spec = JobSpec::from_path(file)
        .with_context(|| format!("declaration {} is invalid", file.display()))?;

    println!(
        "{}: ok ({} interpreter versions, digest {})",
        file.display(),
        spec.interpreter_versions.len(),
        &spec.digest()[..12]
    );
    Ok(())
}

fn cmd_matrix(file: &Path) -> Result<()> {
    let spec = JobSpec::from_path(file)
        .with_context(|| format!("failed to load declaration {}", file.display()))?;

    for environment in expand_matrix(&spec)? {
        println!("{}", environment.label());
    }
    Ok(())
}
