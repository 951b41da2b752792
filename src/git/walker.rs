use super::topo::topological_order;
use crate::error::GitError;
use crate::types::{Author, Commit, Reference};
use chrono::{DateTime, Utc};
use git2::{BranchType, Oid, ReferenceType, Repository};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Everything the history walk produces for one tip
#[derive(Debug, Clone, Default)]
pub struct History {
    /// Commits in topological order, parents before children
    pub commits: Vec<Commit>,
    /// Distinct authors in first-sighting order
    pub authors: Vec<Author>,
    /// References whose target lies in the walked history, sorted by name
    pub references: Vec<Reference>,
}

/// Git repository walker for extracting commit history
pub struct HistoryWalker {
    repo: Repository,
    repo_path: PathBuf,
}

impl HistoryWalker {
    /// Discover and open a git repository from any path within it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let path = path.as_ref();

        let repo = Repository::discover(path)
            .map_err(|e| GitError::NotARepository(format!("{}: {}", path.display(), e.message())))?;

        let repo_path = repo
            .workdir()
            .unwrap_or_else(|| repo.path())
            .to_path_buf();

        tracing::info!("Opened git repository at: {}", repo_path.display());

        Ok(Self { repo, repo_path })
    }

    /// Get the repository root path
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Underlying repository handle
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Resolve a branch name (or HEAD when `None`) to its tip commit
    ///
    /// Local branches are tried first, then remote-tracking branches, then any
    /// revision expression that peels to a commit.
    pub fn resolve_tip(&self, branch: Option<&str>) -> Result<Oid, GitError> {
        let Some(name) = branch else {
            return self
                .repo
                .head()
                .and_then(|head| head.peel_to_commit())
                .map(|commit| commit.id())
                .map_err(|e| GitError::BranchNotFound(format!("HEAD: {}", e.message())));
        };

        for kind in [BranchType::Local, BranchType::Remote] {
            if let Ok(found) = self.repo.find_branch(name, kind)
                && let Ok(commit) = found.get().peel_to_commit()
            {
                return Ok(commit.id());
            }
        }

        self.repo
            .revparse_single(name)
            .and_then(|object| object.peel_to_commit())
            .map(|commit| commit.id())
            .map_err(|_| GitError::BranchNotFound(name.to_string()))
    }

    /// Walk the history reachable from `branch` (HEAD when `None`)
    ///
    /// Nothing is returned unless the whole walk succeeds.
    pub fn walk(&self, branch: Option<&str>, tags_only: bool) -> Result<History, GitError> {
        let tip = self.resolve_tip(branch)?;
        tracing::debug!("Walking history from {}", tip);

        let order = topological_order(tip, |id| {
            let commit = self
                .repo
                .find_commit(*id)
                .map_err(|_| GitError::ObjectNotFound(id.to_string()))?;
            Ok(commit.parent_ids().collect())
        })?;

        let mut commits = Vec::with_capacity(order.len());
        let mut authors = Vec::new();
        let mut signatures = HashSet::new();

        for (count, oid) in order.into_iter().enumerate() {
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|_| GitError::ObjectNotFound(oid.to_string()))?;
            let record = commit_record(&commit);

            if signatures.insert(record.author.signature()) {
                authors.push(record.author.clone());
            }
            commits.push(record);

            if (count + 1) % 1000 == 0 {
                tracing::debug!("Processed {} commits", count + 1);
            }
        }

        let visited: HashSet<&str> = commits.iter().map(|c| c.id.as_str()).collect();
        let references = self.references(&visited, tags_only)?;

        tracing::info!(
            "Walked {} commits, {} authors, {} references",
            commits.len(),
            authors.len(),
            references.len()
        );

        Ok(History {
            commits,
            authors,
            references,
        })
    }

    /// Direct references whose peeled commit is in `visited`, sorted by name
    pub fn references(
        &self,
        visited: &HashSet<&str>,
        tags_only: bool,
    ) -> Result<Vec<Reference>, GitError> {
        let mut references = Vec::new();

        for reference in self.repo.references()? {
            let reference = reference?;

            if reference.kind() == Some(ReferenceType::Symbolic) {
                continue;
            }
            let Some(name) = reference.name() else {
                tracing::debug!("Skipping reference with a non UTF-8 name");
                continue;
            };
            if tags_only && !reference.is_tag() {
                continue;
            }
            // Tags on trees or blobs do not peel to a commit
            let Ok(target) = reference.peel_to_commit() else {
                continue;
            };
            let target = target.id().to_string();
            if !visited.contains(target.as_str()) {
                continue;
            }

            references.push(Reference {
                name: name.to_string(),
                target,
                is_tag: reference.is_tag(),
                is_branch: reference.is_branch(),
                is_remote: reference.is_remote(),
            });
        }

        references.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(references)
    }
}

fn commit_record(commit: &git2::Commit) -> Commit {
    let author = commit.author();
    let name = String::from_utf8_lossy(author.name_bytes());
    let email = String::from_utf8_lossy(author.email_bytes());

    Commit {
        id: commit.id().to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        author: Author::new(&name, &email),
        message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        parents: commit.parent_ids().map(|id| id.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::TestRepo;
    use std::collections::HashMap;

    #[test]
    fn test_open_non_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = HistoryWalker::open(dir.path().join("missing"));
        assert!(matches!(result, Err(GitError::NotARepository(_))));
    }

    #[test]
    fn test_open_from_subdirectory() {
        let mut repo = TestRepo::new();
        repo.commit(&[("src/a.js", "var a = 1;")], "init");

        let walker = HistoryWalker::open(repo.path().join("src")).unwrap();
        assert_eq!(
            walker.repo_path().canonicalize().unwrap(),
            repo.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_unknown_branch_is_fatal() {
        let mut repo = TestRepo::new();
        repo.commit(&[("a.js", "1;")], "init");

        let walker = HistoryWalker::open(repo.path()).unwrap();
        let result = walker.walk(Some("no-such-branch"), false);
        assert!(matches!(result, Err(GitError::BranchNotFound(name)) if name == "no-such-branch"));
    }

    #[test]
    fn test_empty_repository_has_no_head() {
        let repo = TestRepo::new();
        let walker = HistoryWalker::open(repo.path()).unwrap();
        assert!(matches!(
            walker.walk(None, false),
            Err(GitError::BranchNotFound(_))
        ));
    }

    #[test]
    fn test_commit_records() {
        let mut repo = TestRepo::new();
        let first = repo.commit(&[("a.js", "1;")], "first commit\n\nbody");
        let second = repo.commit(&[("b.js", "2;")], "second");

        let walker = HistoryWalker::open(repo.path()).unwrap();
        let history = walker.walk(None, false).unwrap();

        assert_eq!(history.commits.len(), 2);
        let ids: Vec<&str> = history.commits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![first.to_string(), second.to_string()]);

        let c = &history.commits[0];
        assert_eq!(c.id.len(), 40);
        assert_eq!(c.message, "first commit\n\nbody");
        assert_eq!(c.author.name, "test author");
        assert_eq!(c.author.email, "test@example.com");
        assert!(c.parents.is_empty());
        assert_eq!(history.commits[1].parents, vec![first.to_string()]);
        assert!(history.commits[1].timestamp > c.timestamp);

        assert_eq!(history.authors.len(), 1);
    }

    #[test]
    fn test_topological_order_with_merge() {
        let mut repo = TestRepo::new();
        let base = repo.commit(&[("a.js", "1;")], "base");
        let left = repo.commit_on(None, &[base], &[("l.js", "l;")], "left");
        let right = repo.commit_on(None, &[base], &[("r.js", "r;")], "right");
        let merge = repo.commit_on(None, &[left, right], &[("m.js", "m;")], "merge");
        repo.branch("feature", merge);

        let walker = HistoryWalker::open(repo.path()).unwrap();
        let history = walker.walk(Some("feature"), false).unwrap();

        let position: HashMap<&str, usize> = history
            .commits
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.as_str(), i))
            .collect();
        assert_eq!(history.commits.len(), 4);
        for commit in &history.commits {
            for parent in &commit.parents {
                assert!(position[parent.as_str()] < position[commit.id.as_str()]);
            }
        }
        assert_eq!(history.commits.last().unwrap().id, merge.to_string());
    }

    #[test]
    fn test_walk_is_deterministic() {
        let mut repo = TestRepo::new();
        let base = repo.commit(&[("a.js", "1;")], "base");
        let left = repo.commit_on(None, &[base], &[("l.js", "l;")], "left");
        let right = repo.commit_on(None, &[base], &[("r.js", "r;")], "right");
        let merge = repo.commit_on(None, &[left, right], &[], "merge");
        repo.branch("merged", merge);

        let walker = HistoryWalker::open(repo.path()).unwrap();
        let first = walker.walk(Some("merged"), false).unwrap();
        let second = walker.walk(Some("merged"), false).unwrap();
        assert_eq!(first.commits, second.commits);
        assert_eq!(first.references, second.references);
    }

    #[test]
    fn test_references_in_visited_set() {
        let mut repo = TestRepo::new();
        let first = repo.commit(&[("a.js", "1;")], "first");
        let second = repo.commit(&[("b.js", "2;")], "second");
        repo.tag("v1", first, true);
        repo.tag("v2-light", second, false);
        repo.branch("old", first);

        // A side branch outside the walked history
        let outside = repo.commit_on(Some("refs/heads/side"), &[], &[("s.js", "s;")], "side");
        repo.tag("side-tag", outside, false);

        let walker = HistoryWalker::open(repo.path()).unwrap();
        let tip = second.to_string();
        let history = walker.walk(Some(tip.as_str()), false).unwrap();

        let names: Vec<&str> = history.references.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"refs/tags/v1"));
        assert!(names.contains(&"refs/tags/v2-light"));
        assert!(names.contains(&"refs/heads/old"));
        assert!(!names.contains(&"refs/heads/side"));
        assert!(!names.contains(&"refs/tags/side-tag"));

        let v1 = history
            .references
            .iter()
            .find(|r| r.name == "refs/tags/v1")
            .unwrap();
        assert_eq!(v1.target, first.to_string(), "annotated tag must be peeled");
        assert!(v1.is_tag && !v1.is_branch && !v1.is_remote);

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_tags_only_filter() {
        let mut repo = TestRepo::new();
        let first = repo.commit(&[("a.js", "1;")], "first");
        repo.tag("v1", first, false);
        repo.branch("topic", first);

        let walker = HistoryWalker::open(repo.path()).unwrap();
        let history = walker.walk(None, true).unwrap();
        assert_eq!(history.references.len(), 1);
        assert!(history.references.iter().all(|r| r.is_tag));
    }
}
