//! JSON document renderer

use super::ResultExporter;
use crate::config::ExportFormat;
use crate::dedup::InternTable;
use crate::error::ExportError;
use crate::extract::{ExtractionResult, ExtractionStats};
use crate::types::{Author, Commit, MetricsOutcome, Reference};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Document<'a> {
    project: &'a str,
    stats: &'a ExtractionStats,
    authors: &'a [Author],
    commits: &'a [Commit],
    references: &'a [Reference],
    paths: &'a InternTable,
    contents: &'a InternTable,
    commit_files: Vec<CommitFilesView<'a>>,
    outcomes: &'a [MetricsOutcome],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitFilesView<'a> {
    commit_id: &'a str,
    files: Vec<FileView<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileView<'a> {
    content_id: &'a str,
    path: &'a str,
}

/// Renders a result as one pretty-printed JSON document with resolved file lists
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExporter;

impl ResultExporter for JsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn export(&self, result: &ExtractionResult, out: &mut dyn Write) -> Result<(), ExportError> {
        let files = &result.files;
        let commit_files = files
            .commit_files()
            .iter()
            .map(|commit| CommitFilesView {
                commit_id: &commit.commit_id,
                files: commit
                    .files
                    .iter()
                    .filter_map(|file| files.resolve(file))
                    .map(|(content_id, path)| FileView { content_id, path })
                    .collect(),
            })
            .collect();

        let document = Document {
            project: &result.project,
            stats: &result.stats,
            authors: &result.authors,
            commits: &result.commits,
            references: &result.references,
            paths: files.paths(),
            contents: files.contents(),
            commit_files,
            outcomes: &result.outcomes,
        };

        serde_json::to_writer_pretty(&mut *out, &document)
            .map_err(|e| ExportError::SerializeFailed(e.to_string()))?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}
