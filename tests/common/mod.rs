//! Scratch repositories built through git2

#![allow(dead_code)]

use git2::{Oid, Repository, Signature, Time};
use std::path::Path;
use tempfile::TempDir;

pub const WORKER_BIN: &str = env!("CARGO_BIN_EXE_project-metrics");

pub struct Fixture {
    pub dir: TempDir,
    pub repo: Repository,
    clock: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Self {
            dir,
            repo,
            clock: 1_500_000_000,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Add or update `files` and commit on HEAD
    pub fn commit(&mut self, files: &[(&str, &str)], message: &str) -> Oid {
        for (path, content) in files {
            let full = self.dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, content).unwrap();
        }

        let mut index = self.repo.index().unwrap();
        for (path, _) in files {
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();
        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();

        self.clock += 3600;
        let sig = Signature::new("Dev", "dev@example.com", &Time::new(self.clock, 0)).unwrap();
        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .map(|id| self.repo.find_commit(id).unwrap());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    pub fn tag(&self, name: &str, target: Oid) {
        let object = self.repo.find_object(target, None).unwrap();
        self.repo.tag_lightweight(name, &object, false).unwrap();
    }
}

/// Commit A adds `src/a.js` (X); commit B adds `src/b.js` (X) and `src/c.js` (Y)
pub fn two_commit_fixture() -> Fixture {
    let mut fixture = Fixture::new();
    let first = fixture.commit(&[("src/a.js", "var x = 1;\n")], "A");
    fixture.commit(
        &[("src/b.js", "var x = 1;\n"), ("src/c.js", "function y(a) { return a ? 1 : 2; }\n")],
        "B",
    );
    fixture.tag("v1", first);
    fixture
}
