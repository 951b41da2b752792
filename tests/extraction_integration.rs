/// End-to-end extraction against scratch repositories
mod common;

use common::{Fixture, WORKER_BIN, two_commit_fixture};
use project_metrics::config::Config;
use project_metrics::dispatch::WorkerCommand;
use project_metrics::error::{GitError, MetricsError};
use project_metrics::extract::Extractor;

fn extractor(workers: usize) -> Extractor {
    let mut config = Config::default();
    config.pool.size = workers;
    Extractor::new(config).with_worker_command(WorkerCommand::new(WORKER_BIN).arg("worker"))
}

#[tokio::test]
async fn test_shared_content_analyzed_once() {
    let fixture = two_commit_fixture();
    let result = extractor(2).run(fixture.path()).await.unwrap();

    assert_eq!(result.commits.len(), 2);
    assert_eq!(result.commits[0].message.trim(), "A");
    assert_eq!(result.commits[1].message.trim(), "B");

    assert_eq!(result.files.paths().len(), 3);
    assert_eq!(result.files.contents().len(), 2);
    assert_eq!(result.files.total_file_count(), 4);

    assert_eq!(result.outcomes.len(), 2);
    assert!(result.outcomes.iter().all(|o| o.is_success()));
    for content_id in result.files.contents().iter() {
        assert!(result.outcome(content_id).is_some());
    }

    assert_eq!(result.stats.jobs_submitted, 2);
    assert_eq!(result.stats.succeeded, 2);
    assert_eq!(result.stats.failed, 0);

    let tag = result
        .references
        .iter()
        .find(|r| r.name == "refs/tags/v1")
        .unwrap();
    assert!(tag.is_tag);
    assert_eq!(tag.target, result.commits[0].id);
}

#[tokio::test]
async fn test_repeated_runs_agree() {
    let fixture = two_commit_fixture();
    let extractor = extractor(1);

    let first = extractor.run(fixture.path()).await.unwrap();
    let second = extractor.run(fixture.path()).await.unwrap();

    assert_eq!(first.commits, second.commits);
    assert_eq!(first.references, second.references);
    assert_eq!(first.files, second.files);
    for outcome in &first.outcomes {
        assert_eq!(second.outcome(&outcome.content_id), Some(outcome));
    }
}

#[tokio::test]
async fn test_syntax_error_is_recorded_not_fatal() {
    let mut fixture = Fixture::new();
    fixture.commit(
        &[("good.js", "var ok = 1;\n"), ("bad.js", "function (\n")],
        "mixed",
    );

    let result = extractor(2).run(fixture.path()).await.unwrap();

    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.stats.succeeded, 1);
    assert_eq!(result.stats.failed, 1);
    let failed = result.outcomes.iter().find(|o| !o.is_success()).unwrap();
    assert!(failed.reason().unwrap().starts_with("Line "));
}

#[tokio::test]
async fn test_non_javascript_files_are_not_analyzed() {
    let mut fixture = Fixture::new();
    fixture.commit(&[("README.md", "# notes\n"), ("lib/util.js", "var u;\n")], "init");

    let result = extractor(1).run(fixture.path()).await.unwrap();

    assert_eq!(result.files.paths().len(), 1);
    assert_eq!(result.outcomes.len(), 1);
}

#[tokio::test]
async fn test_not_a_repository() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = extractor(1).run(dir.path()).await.unwrap_err();
    assert!(matches!(err, MetricsError::Git(GitError::NotARepository(_))));
}
