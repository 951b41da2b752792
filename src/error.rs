/// Centralized error types for project-metrics using thiserror
///
/// Fatal errors (unreadable repository, unknown branch, destination collision)
/// abort a run before any job is submitted. Per-job failures never show up here:
/// they are converted into failed outcomes by the dispatch engine.
use thiserror::Error;

/// Main error type for the extraction pipeline
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors related to repository access and history walking
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Failed to walk history: {0}")]
    WalkFailed(String),

    #[error("Commit graph contains a cycle at {0}")]
    CycleDetected(String),
}

/// Errors raised by the worker pool itself (never by a single job)
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Worker pool size must be greater than 0")]
    InvalidPoolSize,

    #[error("Failed to spawn worker '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Worker {slot} failed the configuration handshake: {reason}")]
    HandshakeFailed { slot: usize, reason: String },

    #[error("Worker I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed worker message: {0}")]
    Protocol(String),

    #[error("No worker could be started")]
    NoWorkers,
}

/// Errors related to writing the result set
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Output destination already exists: {0}")]
    DestinationExists(String),

    #[error("Failed to write '{path}': {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Failed to serialize results: {0}")]
    SerializeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Errors produced by the metrics analyzer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("{0}")]
    ParseFailed(String),
}

impl From<anyhow::Error> for MetricsError {
    fn from(err: anyhow::Error) -> Self {
        MetricsError::Other(format!("{:#}", err))
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        GitError::WalkFailed(err.message().to_string())
    }
}

impl MetricsError {
    /// Create a new error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        MetricsError::Other(msg.into())
    }

    /// Whether this error must abort the run before any job is submitted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MetricsError::Git(GitError::NotARepository(_))
                | MetricsError::Git(GitError::BranchNotFound(_))
                | MetricsError::Export(ExportError::DestinationExists(_))
                | MetricsError::Config(_)
        )
    }
}
