//! Commit tree listing and file selection

use crate::error::{ConfigError, GitError};
use globset::{Glob, GlobSet, GlobSetBuilder};
use git2::{ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};

const SYMLINK_MODE: i32 = 0o120000;

/// One selected blob of a commit's tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Blob SHA, identical for identical content
    pub content_id: String,
    /// Path relative to the repository root, `/`-separated
    pub path: String,
}

/// Selects analyzed files by name suffix and exclude globs
#[derive(Debug, Clone)]
pub struct FileFilter {
    suffixes: Vec<String>,
    excludes: GlobSet,
}

impl FileFilter {
    /// Build a filter; suffixes match case-insensitively
    pub fn new(suffixes: &[String], exclude_patterns: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidValue {
                key: "extraction.exclude_patterns".to_string(),
                reason: format!("invalid glob '{}': {}", pattern, e),
            })?;
            builder.add(glob);
        }
        let excludes = builder.build().map_err(|e| ConfigError::InvalidValue {
            key: "extraction.exclude_patterns".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            suffixes: suffixes.iter().map(|s| s.to_ascii_lowercase()).collect(),
            excludes,
        })
    }

    /// Whether `path` names a file that should be analyzed
    ///
    /// The file name needs at least one character before the suffix, so a file
    /// literally named `.js` is not selected.
    pub fn matches(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path).as_bytes();
        let suffix_match = self.suffixes.iter().any(|suffix| {
            let suffix = suffix.as_bytes();
            name.len() > suffix.len()
                && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
        });

        suffix_match && !self.excludes.is_match(path)
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            suffixes: vec![".js".to_string()],
            excludes: GlobSet::empty(),
        }
    }
}

/// List the selected blobs of a commit's tree in pre-order
pub fn list_commit_files(
    repo: &Repository,
    commit_id: &str,
    filter: &FileFilter,
) -> Result<Vec<TreeEntry>, GitError> {
    let oid = Oid::from_str(commit_id).map_err(|_| GitError::ObjectNotFound(commit_id.to_string()))?;
    let commit = repo
        .find_commit(oid)
        .map_err(|_| GitError::ObjectNotFound(commit_id.to_string()))?;
    let tree = commit.tree()?;

    let mut files = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() != Some(ObjectType::Blob) || entry.filemode() == SYMLINK_MODE {
            return TreeWalkResult::Ok;
        }
        let Some(name) = entry.name() else {
            return TreeWalkResult::Ok;
        };

        let path = format!("{}{}", root, name);
        if filter.matches(&path) {
            files.push(TreeEntry {
                content_id: entry.id().to_string(),
                path,
            });
        }
        TreeWalkResult::Ok
    })?;

    Ok(files)
}

/// Read a blob as text, replacing invalid UTF-8 sequences
pub fn read_blob_text(repo: &Repository, content_id: &str) -> Result<String, GitError> {
    let oid = Oid::from_str(content_id).map_err(|_| GitError::ObjectNotFound(content_id.to_string()))?;
    let blob = repo
        .find_blob(oid)
        .map_err(|_| GitError::ObjectNotFound(content_id.to_string()))?;
    Ok(String::from_utf8_lossy(blob.content()).into_owned())
}
