//! cdagent - build-execution core of a continuous-delivery agent
//!
//! ## Commands
//!
//! - `run`: sync a job's material and run its tasks
//! - `plan`: print the steps a job would execute
//! - `sync`: bring a working directory to a material revision

mod job;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, Level};

use cdagent_materials::{Material, RevisionContext};
use cdagent_session::{
    Builder, BuildReport, BuildSession, ConsoleSink, JobResult, Redactor, SessionConfig,
};

use crate::job::JobFile;

#[derive(Parser)]
#[command(name = "cdagent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-execution core of a continuous-delivery agent", long_about = None)]
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
    /// Sync the job's material, then run its tasks
    Run {
        /// Path to the job file (TOML)
        job: PathBuf,

        /// Print the build report as JSON after the console output
        #[arg(long)]
        report: bool,
    },

    /// Print the steps a job would execute, without running anything
    Plan {
        /// Path to the job file (TOML)
        job: PathBuf,
    },

    /// Synchronize a working directory to a material revision
    Sync {
        /// Path to the material definition (TOML)
        #[arg(short, long)]
        material: PathBuf,

        /// Target revision
        #[arg(short, long)]
        revision: String,

        /// Oldest revision of the triggering modifications
        #[arg(long)]
        oldest: Option<String>,

        /// Number of modifications between --oldest and --revision
        #[arg(long, default_value = "1")]
        modifications: u32,

        /// Pipeline working directory
        #[arg(short, long)]
        working_dir: PathBuf,

        /// Print the build report as JSON after the console output
        #[arg(long)]
        report: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cdagent_session::init_tracing(cli.json, level);

    let config = SessionConfig::from_env().context("Invalid cdagent environment configuration")?;

    match cli.command {
        Commands::Run { job, report } => cmd_run(&job, config, report).await,
        Commands::Plan { job } => cmd_plan(&job),
        Commands::Sync {
            material,
            revision,
            oldest,
            modifications,
            working_dir,
            report,
        } => {
            let mut ctx = RevisionContext::new(revision);
            if let Some(oldest) = oldest {
                ctx = ctx.with_oldest(oldest, modifications);
            }
            cmd_sync(&material, &ctx, &working_dir, config, report).await
        }
    }
}

async fn cmd_run(path: &Path, mut config: SessionConfig, print_report: bool) -> Result<()> {
    let job = JobFile::load(path)?;
    if let Some(secs) = job.command_timeout_secs {
        config.command_timeout_secs = secs;
    }
    info!(job = %path.display(), working_dir = %job.working_dir.display(), "running job");

    let tree = job.to_tree()?;
    let report = execute(tree, config).await;
    finish(report, print_report)
}

fn cmd_plan(path: &Path) -> Result<()> {
    let job = JobFile::load(path)?;
    let tree = job.to_tree()?;

    let mut redactor = Redactor::new();
    for secret in tree.secrets() {
        redactor.add(&secret);
    }
    for line in tree.outline() {
        println!("{}", redactor.redact(&line));
    }
    Ok(())
}

async fn cmd_sync(
    material_path: &Path,
    ctx: &RevisionContext,
    working_dir: &Path,
    config: SessionConfig,
    print_report: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(material_path)
        .with_context(|| format!("Failed to read material {}", material_path.display()))?;
    let material: Material = toml::from_str(&text)
        .with_context(|| format!("Invalid material in {}", material_path.display()))?;

    info!(material = material.kind(), revision = %ctx.latest, "syncing material");
    let tree = cdagent_materials::update_to(&material, working_dir, ctx)
        .context("Invalid material")?;

    let report = execute(tree, config).await;
    finish(report, print_report)
}

/// Run a tree, streaming the console to stdout. Ctrl-C cancels the build.
async fn execute(tree: Builder, config: SessionConfig) -> BuildReport {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{line}");
        }
    });

    let session = BuildSession::with_config(ConsoleSink::new().with_tee(tx), config);

    let cancel = session.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling build...");
            cancel.cancel();
        }
    });

    let report = session.run(tree).await;

    interrupt.abort();
    // The console owns the only sender; dropping it lets the printer drain.
    drop(session);
    let _ = printer.await;

    report
}

fn finish(report: BuildReport, print_report: bool) -> Result<()> {
    if print_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    info!(result = %report.result, duration_ms = report.duration_ms, "build finished");

    match report.result {
        JobResult::Passed => Ok(()),
        result => bail!(
            "Build {}{}",
            result.to_string().to_lowercase(),
            report
                .error
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        ),
    }
}
