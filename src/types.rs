use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Reserved failure reason for jobs resolved by the watchdog
pub const TIMEOUT_REASON: &str = "timeout";

/// Commit author, lower-cased so signatures compare case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// Build an author, normalizing both fields to lower case
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            email: email.to_lowercase(),
        }
    }

    /// `name<email>` signature used to deduplicate authors
    pub fn signature(&self) -> String {
        format!("{}<{}>", self.name, self.email)
    }
}

/// A commit visited by the history walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Full commit SHA (40 hex characters)
    pub id: String,
    /// Commit time in UTC
    pub timestamp: DateTime<Utc>,
    pub author: Author,
    pub message: String,
    /// Parent SHAs in parent order
    pub parents: Vec<String>,
}

/// A named reference whose peeled target lies in the walked history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Full reference name, e.g. `refs/tags/v1.0`
    pub name: String,
    /// Target commit SHA
    pub target: String,
    pub is_tag: bool,
    pub is_branch: bool,
    pub is_remote: bool,
}

/// Per-function complexity figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMetrics {
    pub name: String,
    /// 1-based line of the function's first token
    pub line: usize,
    /// Logical lines of code (statements)
    pub loc: usize,
    pub cyclomatic: usize,
    pub params: usize,
}

/// Per-file complexity figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetrics {
    /// Logical lines of code (statements)
    pub loc: usize,
    pub cyclomatic: usize,
    pub function_count: usize,
    pub functions: Vec<FunctionMetrics>,
    pub dependency_count: usize,
}

/// Why a job did not produce metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The analyzer rejected the source
    Analysis(String),
    /// The worker exceeded its per-job deadline and was replaced
    Timeout,
    /// The worker process died while holding the job
    WorkerExited,
    /// The worker answered with something that is not a valid response
    Protocol(String),
    /// Every pool slot was retired before the job could be assigned
    NoWorkers,
}

impl FailureReason {
    /// Parse a reason string received over the wire
    pub fn from_reason(reason: &str) -> Self {
        if reason == TIMEOUT_REASON {
            FailureReason::Timeout
        } else {
            FailureReason::Analysis(reason.to_string())
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Analysis(reason) => write!(f, "{}", reason),
            FailureReason::Timeout => write!(f, "{}", TIMEOUT_REASON),
            FailureReason::WorkerExited => write!(f, "worker exited unexpectedly"),
            FailureReason::Protocol(detail) => write!(f, "malformed worker response: {}", detail),
            FailureReason::NoWorkers => write!(f, "no workers available"),
        }
    }
}

/// Terminal result of exactly one submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsOutcome {
    pub content_id: String,
    pub result: Result<FileMetrics, FailureReason>,
}

impl MetricsOutcome {
    pub fn success(content_id: impl Into<String>, metrics: FileMetrics) -> Self {
        Self {
            content_id: content_id.into(),
            result: Ok(metrics),
        }
    }

    pub fn failure(content_id: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            content_id: content_id.into(),
            result: Err(reason),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.result, Err(FailureReason::Timeout))
    }

    pub fn metrics(&self) -> Option<&FileMetrics> {
        self.result.as_ref().ok()
    }

    /// Failure reason text, `None` on success
    pub fn reason(&self) -> Option<String> {
        self.result.as_ref().err().map(|r| r.to_string())
    }
}

impl Serialize for MetricsOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MetricsOutcome", 3)?;
        state.serialize_field("contentId", &self.content_id)?;
        state.serialize_field("ok", &self.is_success())?;
        match &self.result {
            Ok(metrics) => state.serialize_field("metrics", metrics)?,
            Err(reason) => state.serialize_field("reason", &reason.to_string())?,
        }
        state.end()
    }
}
