use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use project_metrics::config::{Config, ExportFormat};
use project_metrics::dispatch::worker;
use project_metrics::export::{Destination, exporter_for};
use project_metrics::extract::Extractor;
use project_metrics::memory::{MemoryMonitor, SharedMonitor, spawn_sampler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Compute code metrics across a git repository's history
#[derive(Parser)]
#[command(name = "project-metrics", version, long_version = LONG_VERSION)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract commits, files and metrics into OUTPUT
    Extract(ExtractArgs),
    /// Serve analysis jobs on stdin/stdout (used by the worker pool)
    #[command(hide = true)]
    Worker,
}

#[derive(Args)]
struct ExtractArgs {
    /// Path to the repository (or any directory inside it)
    repository: PathBuf,

    /// Output file; must not exist
    output: PathBuf,

    /// Branch to walk (default: HEAD)
    #[arg(short, long)]
    branch: Option<String>,

    /// Only export tag references
    #[arg(long)]
    tags_only: bool,

    /// Number of worker processes
    #[arg(short, long)]
    workers: Option<usize>,

    /// Per-file analysis deadline
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log memory usage at this interval
    #[arg(long, value_name = "SECS")]
    memory_interval: Option<u64>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<ExportFormat>,

    /// Configuration file (default: platform config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// File name suffix to analyze (repeatable)
    #[arg(long = "suffix", value_name = "SUFFIX")]
    suffixes: Vec<String>,

    /// Glob of paths to skip (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    excludes: Vec<String>,
}

impl ExtractArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(branch) = &self.branch {
            config.extraction.branch = Some(branch.clone());
        }
        if self.tags_only {
            config.extraction.tags_only = true;
        }
        if !self.suffixes.is_empty() {
            config.extraction.suffixes = self.suffixes.clone();
        }
        if !self.excludes.is_empty() {
            config.extraction.exclude_patterns = self.excludes.clone();
        }
        if let Some(workers) = self.workers {
            config.pool.size = workers;
        }
        if let Some(timeout) = self.timeout {
            config.pool.timeout_secs = timeout;
        }
        if let Some(interval) = self.memory_interval {
            config.reporting.memory_interval_secs = Some(interval);
        }
        if let Some(format) = self.format {
            config.export.format = format;
        }
    }
}

fn init_logging(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Worker => {
            // stdout belongs to the protocol
            init_logging(tracing::Level::WARN);
            worker::run().context("worker failed")?;
            Ok(())
        }
        Command::Extract(args) => {
            init_logging(if cli.verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            });
            let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
            runtime.block_on(extract(args))
        }
    }
}

async fn extract(args: ExtractArgs) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    // Fail before any work if the output is already there
    let destination = Destination::check(&args.output)?;

    let monitor: SharedMonitor = Arc::new(Mutex::new(MemoryMonitor::new()));
    let sampler = spawn_sampler(
        monitor.clone(),
        config.reporting.memory_interval_secs.map(Duration::from_secs),
    );
    let started = Instant::now();

    let format = config.export.format;
    let result = Extractor::new(config).run(&args.repository).await;
    sampler.abort();
    let result = result.inspect_err(|e| {
        if e.is_fatal() {
            tracing::error!("Aborting before analysis: {}", e);
        }
    })?;

    destination.write(&result, exporter_for(format).as_ref())?;

    let peak_mb = {
        let mut monitor = monitor.lock().await;
        monitor.sample();
        monitor.peak_resident_mb()
    };
    let stats = &result.stats;
    tracing::info!(
        "Done in {:.1}s: {} commits, {} references, {} paths, {} contents, {} analyzed, {} failed ({} timed out), peak memory {:.1} Mb",
        started.elapsed().as_secs_f64(),
        stats.commits,
        stats.references,
        stats.paths,
        stats.contents,
        stats.succeeded,
        stats.failed,
        stats.timed_out,
        peak_mb
    );

    Ok(())
}
