//! Newline-delimited JSON messages exchanged with worker processes

use crate::error::DispatchError;
use crate::types::{FailureReason, FileMetrics, MetricsOutcome};
use serde::{Deserialize, Serialize};

/// Settings sent to every worker in the configuration handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSettings {
    /// Analyzer language
    pub language: String,
    /// Test hook: jobs whose source contains this marker never complete
    #[doc(hidden)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hang_marker: Option<String>,
    /// Test hook: the worker process exits on jobs whose source contains this marker
    #[doc(hidden)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_marker: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            language: crate::analyzer::JAVASCRIPT.to_string(),
            hang_marker: None,
            exit_marker: None,
        }
    }
}

/// Coordinator to worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerRequest {
    Configure {
        params: WorkerSettings,
    },
    #[serde(rename_all = "camelCase")]
    Analyze {
        content_id: String,
        source_text: String,
    },
}

/// Worker to coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerResponse {
    Configured,
    #[serde(rename_all = "camelCase")]
    Result {
        content_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metrics: Option<FileMetrics>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl WorkerResponse {
    /// Response carrying an analysis outcome
    pub fn from_outcome(content_id: &str, result: Result<FileMetrics, String>) -> Self {
        match result {
            Ok(metrics) => WorkerResponse::Result {
                content_id: content_id.to_string(),
                ok: true,
                metrics: Some(metrics),
                reason: None,
            },
            Err(reason) => WorkerResponse::Result {
                content_id: content_id.to_string(),
                ok: false,
                metrics: None,
                reason: Some(reason),
            },
        }
    }

    /// Convert a result response into an outcome; `None` for a handshake ack
    pub fn into_outcome(self) -> Option<MetricsOutcome> {
        let WorkerResponse::Result {
            content_id,
            ok,
            metrics,
            reason,
        } = self
        else {
            return None;
        };

        Some(match (ok, metrics) {
            (true, Some(metrics)) => MetricsOutcome::success(content_id, metrics),
            (true, None) => MetricsOutcome::failure(
                content_id,
                FailureReason::Protocol("success without metrics".to_string()),
            ),
            (false, _) => MetricsOutcome::failure(
                content_id,
                FailureReason::from_reason(reason.as_deref().unwrap_or("unknown failure")),
            ),
        })
    }
}

/// Serialize a message as one line, including the trailing newline
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, DispatchError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| DispatchError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (trailing whitespace ignored)
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, DispatchError> {
    serde_json::from_str(line.trim_end()).map_err(|e| DispatchError::Protocol(e.to_string()))
}
