//! Process-wide path and content tables built from every commit's tree
//!
//! Each distinct path string and each distinct content id is interned once,
//! first sighting wins. Per-commit file lists refer to the tables by index, so
//! a content shared by many commits and paths is stored (and later analyzed)
//! exactly once.

use crate::error::GitError;
use crate::git::{FileFilter, TreeEntry, list_commit_files};
use crate::types::Commit;
use git2::Repository;
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};

/// Append-only set of strings with stable insertion-order indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternTable {
    values: Vec<String>,
    positions: HashMap<String, usize>,
}

impl InternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `value`, inserting it at the end when unseen
    pub fn intern(&mut self, value: &str) -> usize {
        if let Some(&index) = self.positions.get(value) {
            return index;
        }
        let index = self.values.len();
        self.values.push(value.to_string());
        self.positions.insert(value.to_string(), index);
        index
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn position(&self, value: &str) -> Option<usize> {
        self.positions.get(value).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}

impl Serialize for InternTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.values)
    }
}

/// One (content, path) pair of a commit, as table indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitFile {
    pub content_index: usize,
    pub path_index: usize,
}

/// The selected files of one commit in tree order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitFiles {
    pub commit_id: String,
    pub files: Vec<CommitFile>,
}

/// Path table, content table and per-commit file lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    paths: InternTable,
    contents: InternTable,
    commit_files: Vec<CommitFiles>,
    entries: Vec<CommitFile>,
    seen_entries: HashSet<CommitFile>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a commit's entries and append its file list
    pub fn record_commit(&mut self, commit_id: &str, entries: &[TreeEntry]) -> &CommitFiles {
        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let file = CommitFile {
                content_index: self.contents.intern(&entry.content_id),
                path_index: self.paths.intern(&entry.path),
            };
            if self.seen_entries.insert(file) {
                self.entries.push(file);
            }
            files.push(file);
        }

        self.commit_files.push(CommitFiles {
            commit_id: commit_id.to_string(),
            files,
        });
        &self.commit_files[self.commit_files.len() - 1]
    }

    pub fn paths(&self) -> &InternTable {
        &self.paths
    }

    pub fn contents(&self) -> &InternTable {
        &self.contents
    }

    /// File lists in the order commits were recorded
    pub fn commit_files(&self) -> &[CommitFiles] {
        &self.commit_files
    }

    /// Distinct (content, path) pairs in first-sighting order
    pub fn distinct_entries(&self) -> &[CommitFile] {
        &self.entries
    }

    pub fn distinct_entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Sum of every commit's file list length
    pub fn total_file_count(&self) -> usize {
        self.commit_files.iter().map(|c| c.files.len()).sum()
    }

    /// Resolve a pair to its (content id, path) strings
    pub fn resolve(&self, file: &CommitFile) -> Option<(&str, &str)> {
        Some((
            self.contents.get(file.content_index)?,
            self.paths.get(file.path_index)?,
        ))
    }
}

/// Builds a [`FileIndex`] one commit at a time
pub struct TreeDeduplicator<'r> {
    repo: &'r Repository,
    filter: FileFilter,
    index: FileIndex,
}

impl<'r> TreeDeduplicator<'r> {
    pub fn new(repo: &'r Repository, filter: FileFilter) -> Self {
        Self {
            repo,
            filter,
            index: FileIndex::new(),
        }
    }

    /// List the commit's selected files and register them in the shared tables
    pub fn deduplicate(&mut self, commit: &Commit) -> Result<&CommitFiles, GitError> {
        let entries = list_commit_files(self.repo, &commit.id, &self.filter)?;
        tracing::debug!("Commit {} has {} matching files", commit.id, entries.len());
        Ok(self.index.record_commit(&commit.id, &entries))
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    pub fn finish(self) -> FileIndex {
        tracing::info!(
            "Deduplicated {} commit files into {} paths and {} contents",
            self.index.total_file_count(),
            self.index.paths().len(),
            self.index.contents().len()
        );
        self.index
    }
}
