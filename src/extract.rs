//! Extraction pipeline: walk history, deduplicate trees, analyze contents
//!
//! Stages run strictly one after another. The git stages are blocking and run
//! on tokio's blocking pool; analysis runs on the worker pool.

use crate::config::{Config, ExtractionConfig};
use crate::dedup::{FileIndex, TreeDeduplicator};
use crate::dispatch::{Job, PoolOptions, PoolStats, WorkerCommand, WorkerSettings, execute};
use crate::error::MetricsError;
use crate::git::{FileFilter, HistoryWalker, read_blob_text};
use crate::paths::project_name;
use crate::types::{Author, Commit, MetricsOutcome, Reference};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Everything gathered before analysis starts
#[derive(Debug, Clone)]
pub struct Collected {
    pub project: String,
    pub commits: Vec<Commit>,
    pub authors: Vec<Author>,
    pub references: Vec<Reference>,
    pub files: FileIndex,
    /// One job per distinct content, in content table order
    pub jobs: Vec<Job>,
}

/// Aggregate counts of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub commits: usize,
    pub authors: usize,
    pub references: usize,
    pub paths: usize,
    pub contents: usize,
    /// Sum of all commit file list lengths
    pub commit_files: usize,
    /// Distinct (content, path) pairs
    pub file_entries: usize,
    pub jobs_submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub crashed: usize,
    pub worker_restarts: usize,
}

/// Result of a complete extraction
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Repository directory name
    pub project: String,
    pub commits: Vec<Commit>,
    pub authors: Vec<Author>,
    pub references: Vec<Reference>,
    pub files: FileIndex,
    /// One outcome per distinct content, in completion order
    pub outcomes: Vec<MetricsOutcome>,
    pub stats: ExtractionStats,
}

impl ExtractionResult {
    pub fn outcome(&self, content_id: &str) -> Option<&MetricsOutcome> {
        self.outcomes.iter().find(|o| o.content_id == content_id)
    }
}

/// Walk, deduplicate and fetch content for every distinct blob
///
/// Fails before anything is analyzed if the repository cannot be opened or the
/// branch cannot be resolved.
pub fn collect(repository: &Path, config: &ExtractionConfig) -> Result<Collected, MetricsError> {
    let filter = FileFilter::new(&config.suffixes, &config.exclude_patterns)?;
    let walker = HistoryWalker::open(repository)?;
    let project = project_name(walker.repo_path());

    let history = walker.walk(config.branch.as_deref(), config.tags_only)?;

    let mut dedup = TreeDeduplicator::new(walker.repository(), filter);
    for commit in &history.commits {
        dedup.deduplicate(commit)?;
    }
    let files = dedup.finish();

    let mut jobs = Vec::with_capacity(files.contents().len());
    for content_id in files.contents().iter() {
        let source_text = read_blob_text(walker.repository(), content_id)?;
        jobs.push(Job::new(content_id, source_text));
    }
    tracing::info!("Fetched {} distinct file contents", jobs.len());

    Ok(Collected {
        project,
        commits: history.commits,
        authors: history.authors,
        references: history.references,
        files,
        jobs,
    })
}

/// Runs the whole pipeline against one repository
pub struct Extractor {
    config: Config,
    command: Option<WorkerCommand>,
    settings: WorkerSettings,
}

impl Extractor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            command: None,
            settings: WorkerSettings::default(),
        }
    }

    /// Launch workers with `command` instead of this executable's `worker` subcommand
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_worker_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&self, repository: &Path) -> Result<ExtractionResult, MetricsError> {
        let path: PathBuf = repository.to_path_buf();
        let extraction = self.config.extraction.clone();
        let collected = tokio::task::spawn_blocking(move || collect(&path, &extraction))
            .await
            .map_err(|e| MetricsError::other(format!("History collection task failed: {}", e)))??;

        let jobs_submitted = collected.jobs.len();
        let (outcomes, pool_stats) = if jobs_submitted == 0 {
            tracing::info!("No matching files, skipping analysis");
            (Vec::new(), PoolStats::default())
        } else {
            let command = match &self.command {
                Some(command) => command.clone(),
                None => WorkerCommand::current_exe()?,
            };
            let options = PoolOptions::from_config(&self.config.pool, command, self.settings.clone());
            execute(options, collected.jobs).await?
        };

        let files = collected.files;
        let stats = ExtractionStats {
            commits: collected.commits.len(),
            authors: collected.authors.len(),
            references: collected.references.len(),
            paths: files.paths().len(),
            contents: files.contents().len(),
            commit_files: files.total_file_count(),
            file_entries: files.distinct_entry_count(),
            jobs_submitted,
            succeeded: pool_stats.succeeded,
            failed: pool_stats.failed,
            timed_out: pool_stats.timed_out,
            crashed: pool_stats.crashed,
            worker_restarts: pool_stats.restarts,
        };

        tracing::info!(
            "Extracted {} commits, {} references, {} paths, {} contents ({} analyzed, {} failed)",
            stats.commits,
            stats.references,
            stats.paths,
            stats.contents,
            stats.succeeded,
            stats.failed
        );

        Ok(ExtractionResult {
            project: collected.project,
            commits: collected.commits,
            authors: collected.authors,
            references: collected.references,
            files,
            outcomes,
            stats,
        })
    }
}
