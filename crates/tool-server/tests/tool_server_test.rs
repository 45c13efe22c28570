//! Thin-adapter tests for the `tool-server` binary: CLI-flag parsing against
//! the exact contract named in spec.md §6, and that the MCP handler's
//! advertised tool set matches `orchestrator::tool_dispatch::permitted_tools`
//! per worker kind. The transport itself (`rmcp` over stdio) is the
//! teacher's own library code and isn't re-tested here.

use clap::Parser;
use orchestrator::agent::AgentDriver;
use orchestrator::git::GitDriver;
use orchestrator::store::{Store, WorkerKind};
use orchestrator::term::TermDriver;
use orchestrator::workflow::{Drivers, UnconfiguredHostingSite, WorkflowEngine};
use orchestrator::ToolDispatch;
use rmcp::ServerHandler;
use std::time::Duration;
use tempfile::TempDir;
use tool_server::{Args, ToolServer};

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

fn dispatch_for(repo: &TempDir) -> ToolDispatch {
    let drivers = Drivers {
        store: Store::open_in_memory().unwrap(),
        git: GitDriver::new(repo.path().join("worktrees"), vec![]),
        term: TermDriver::default(),
        agent: AgentDriver::new(TermDriver::default(), Duration::from_secs(5)),
        lm_binary: "sh".to_string(),
        tool_server_binary_coding: "true".to_string(),
        tool_server_binary_review: "true".to_string(),
        tool_server_binary_planning: "true".to_string(),
        review_prompt_template: "Review for correctness.".to_string(),
    };
    ToolDispatch::new(WorkflowEngine::new(drivers, Box::new(UnconfiguredHostingSite)))
}

#[test]
fn args_parses_the_spec_six_contract() {
    let args = Args::parse_from([
        "tool-server",
        "--agent-id",
        "worker-1",
        "--kind",
        "review",
        "--workspace",
        "/tmp/ws",
        "--branch",
        "feature/x",
        "--session",
        "swarm-worker-1",
        "--issue",
        "42",
        "--parent-instance-id",
        "worker-0",
        "--parent-tmux-session",
        "swarm-worker-0",
    ]);

    assert_eq!(args.agent_id, "worker-1");
    assert_eq!(args.kind, "review");
    assert_eq!(args.issue, Some(42));
    assert_eq!(args.parent_instance_id.as_deref(), Some("worker-0"));
    assert_eq!(args.parent_tmux_session.as_deref(), Some("swarm-worker-0"));
}

#[test]
fn args_leaves_optional_review_flags_unset_for_coding() {
    let args = Args::parse_from([
        "tool-server",
        "--agent-id",
        "worker-1",
        "--kind",
        "coding",
        "--workspace",
        "/tmp/ws",
        "--branch",
        "feature/x",
        "--session",
        "swarm-worker-1",
    ]);

    assert_eq!(args.issue, None);
    assert_eq!(args.parent_instance_id, None);
    assert_eq!(args.parent_tmux_session, None);
}

#[test]
fn coding_server_advertises_only_its_two_tools() {
    let repo = setup_repo();
    let server = ToolServer::new("worker-1".to_string(), WorkerKind::Coding, dispatch_for(&repo));
    let info = server.get_info();
    let instructions = info.instructions.unwrap();
    assert!(instructions.contains("request_review"));
    assert!(instructions.contains("create_pull_request"));
    assert!(!instructions.contains("create_task"));
    assert!(!instructions.contains("analyze_repository"));
    assert!(!instructions.contains("request_changes"));
}

#[test]
fn review_server_advertises_only_its_two_tools() {
    let repo = setup_repo();
    let server = ToolServer::new("worker-1".to_string(), WorkerKind::Review, dispatch_for(&repo));
    let instructions = server.get_info().instructions.unwrap();
    assert!(instructions.contains("request_changes"));
    assert!(instructions.contains("create_pull_request"));
    assert!(!instructions.contains("request_review"));
    assert!(!instructions.contains("create_task"));
}

#[test]
fn planning_server_advertises_only_its_two_tools() {
    let repo = setup_repo();
    let server = ToolServer::new("worker-1".to_string(), WorkerKind::Planning, dispatch_for(&repo));
    let instructions = server.get_info().instructions.unwrap();
    assert!(instructions.contains("create_task"));
    assert!(instructions.contains("analyze_repository"));
    assert!(!instructions.contains("request_review"));
    assert!(!instructions.contains("create_pull_request"));
}
