//! # Project Metrics - Complexity Metrics Across a Repository's History
//!
//! Mines the full commit history of a git repository, deduplicates the file
//! contents referenced across that history and computes static complexity
//! metrics for every distinct content on a pool of isolated worker processes.
//! The result is written out as a MySQL INSERT script or a JSON document.
//!
//! ## Pipeline
//!
//! ```text
//! repository ──▶ HistoryWalker ──▶ TreeDeduplicator ──▶ WorkerPool ──▶ exporter
//!                (topological     (path + content     (one job per
//!                 commit list)     tables)             distinct content)
//! ```
//!
//! Identical content is analyzed exactly once no matter how many commits or
//! paths reference it. The worker pool resolves every submitted job with
//! exactly one outcome: workers that exceed the per-job deadline or die are
//! killed, their job is recorded as failed and a replacement is started.
//!
//! ## Modules
//!
//! - [`git`]: repository access, topological history walk, tree listing
//! - [`dedup`]: path and content tables, per-commit file lists
//! - [`analyzer`]: JavaScript metrics on tree-sitter
//! - [`dispatch`]: worker pool, watchdog and worker protocol
//! - [`extract`]: the end-to-end extraction pipeline
//! - [`export`]: SQL and JSON renderers
//! - [`config`]: configuration with file, environment and CLI sources
//! - [`memory`]: process memory reporting
//! - [`error`]: error types
//!
//! ## Usage Example
//!
//! ```no_run
//! use project_metrics::config::Config;
//! use project_metrics::extract::Extractor;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let result = Extractor::new(Config::default())
//!         .run(Path::new("path/to/repository"))
//!         .await?;
//!     println!("{} commits, {} contents", result.stats.commits, result.stats.contents);
//!     Ok(())
//! }
//! ```

/// JavaScript complexity analyzer
pub mod analyzer;

/// Configuration management with environment variable overrides
pub mod config;

/// Path and content deduplication across commits
pub mod dedup;

/// Worker pool, watchdog and worker protocol
pub mod dispatch;

/// Error types and utilities
pub mod error;

/// SQL and JSON result exporters
pub mod export;

/// Extraction pipeline orchestration
pub mod extract;

/// Git repository walking and tree listing
pub mod git;

/// Process memory reporting
pub mod memory;

/// Platform paths and repository naming
pub mod paths;

/// Commit, reference and metrics records
pub mod types;
