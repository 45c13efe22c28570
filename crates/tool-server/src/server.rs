//! `ToolServer` — the rmcp handler every tool-server subprocess runs, and
//! the CLI flags that select its worker identity. Mirrors the teacher's
//! `RustClusterServer` shape (`coordination/src/main.rs`): a `#[derive(Clone)]`
//! struct holding whatever the tool handlers need, a `#[tool_router]` impl
//! block of `#[tool(description = "...")]` async methods, and a
//! `ServerHandler` impl that only needs to supply `get_info` — the macro
//! wires `list_tools`/`call_tool` to the generated router.

// Suppress false positive dead_code warnings from the #[tool_router] macro.
#![allow(dead_code)]

use clap::Parser;
use orchestrator::store::WorkerKind;
use orchestrator::tool_dispatch::{
    self, AnalyzeRepositoryArgs, CreatePullRequestArgs, CreateTaskArgs, RequestChangesArgs, RequestReviewArgs,
    ToolDispatch,
};
use rmcp::{handler::server::wrapper::Parameters, model::ServerCapabilities, model::ServerInfo, schemars, tool, tool_router, ServerHandler};
use std::sync::Arc;

/// Command-line contract named in spec.md §6: one binary, the worker kind
/// selected at runtime by `--kind` (SPEC_FULL.md §1 REDESIGN note), launched
/// by `AgentDriver::start_tool_server` with exactly these flags.
#[derive(Parser, Debug, Clone)]
#[command(name = "tool-server", author, version, about = "Per-worker MCP tool-server subprocess", long_about = None)]
pub struct Args {
    #[arg(long = "agent-id")]
    pub agent_id: String,

    #[arg(long)]
    pub kind: String,

    #[arg(long)]
    pub workspace: String,

    #[arg(long)]
    pub branch: String,

    #[arg(long)]
    pub session: String,

    #[arg(long)]
    pub issue: Option<i64>,

    #[arg(long = "parent-instance-id")]
    pub parent_instance_id: Option<String>,

    #[arg(long = "parent-tmux-session")]
    pub parent_tmux_session: Option<String>,
}

/// The MCP server handler for a single worker. Every tool call is
/// dispatched with `self.worker_id` as the caller, so the worker identity
/// named on the command line is closed over once at startup rather than
/// threaded through each request.
#[derive(Clone)]
pub struct ToolServer {
    worker_id: String,
    kind: WorkerKind,
    dispatch: Arc<ToolDispatch>,
}

impl ToolServer {
    pub fn new(worker_id: String, kind: WorkerKind, dispatch: ToolDispatch) -> Self {
        Self {
            worker_id,
            kind,
            dispatch: Arc::new(dispatch),
        }
    }

    fn permitted(&self, tool_name: &str) -> bool {
        tool_dispatch::permitted_tools(self.kind).contains(&tool_name)
    }

    /// Every tool handler below funnels through this: permission is checked
    /// again here (belt-and-braces on top of `ToolDispatch::dispatch`'s own
    /// check) only to produce a tool-router-shaped error before paying for a
    /// JSON round-trip; `ToolDispatch` remains the single source of truth for
    /// the permission table and the one place a ToolEvent gets logged.
    fn call(&self, tool_name: &str, arguments: serde_json::Value) -> Result<String, String> {
        if !self.permitted(tool_name) {
            return Err(format!(
                "[tool-forbidden] tool '{tool_name}' is not permitted for worker kind '{}'",
                self.kind
            ));
        }
        let response = self.dispatch.dispatch(&self.worker_id, tool_name, arguments);
        let text = response.content.into_iter().map(|c| c.text).collect::<Vec<_>>().join("\n");
        if response.is_error {
            Err(text)
        } else {
            Ok(text)
        }
    }
}

#[tool_router]
impl ToolServer {
    #[tool(
        description = "Request review of the current coding worker's changes. Transitions the worker to waiting_review and spawns a review child."
    )]
    async fn request_review(&self, Parameters(req): Parameters<RequestReviewArgs>) -> Result<String, String> {
        self.call(tool_dispatch::TOOL_REQUEST_REVIEW, serde_json::to_value(req).unwrap())
    }

    #[tool(
        description = "Open a pull request for the caller's branch against its base branch. Valid for coding and review workers."
    )]
    async fn create_pull_request(&self, Parameters(req): Parameters<CreatePullRequestArgs>) -> Result<String, String> {
        self.call(tool_dispatch::TOOL_CREATE_PULL_REQUEST, serde_json::to_value(req).unwrap())
    }

    #[tool(description = "Return feedback to the parent coding worker and terminate this review worker.")]
    async fn request_changes(&self, Parameters(req): Parameters<RequestChangesArgs>) -> Result<String, String> {
        self.call(tool_dispatch::TOOL_REQUEST_CHANGES, serde_json::to_value(req).unwrap())
    }

    #[tool(description = "Record a new task (issue) discovered during planning and complete this planning worker.")]
    async fn create_task(&self, Parameters(req): Parameters<CreateTaskArgs>) -> Result<String, String> {
        self.call(tool_dispatch::TOOL_CREATE_TASK, serde_json::to_value(req).unwrap())
    }

    #[tool(description = "Read-only repository analysis at the given scope and depth; returns a structured report.")]
    async fn analyze_repository(&self, Parameters(req): Parameters<AnalyzeRepositoryArgs>) -> Result<String, String> {
        self.call(tool_dispatch::TOOL_ANALYZE_REPOSITORY, serde_json::to_value(req).unwrap())
    }
}

impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(format!(
                "Tool-server for worker {} (kind={}). Exposes only the tools permitted for this worker kind: {}.",
                self.worker_id,
                self.kind,
                tool_dispatch::permitted_tools(self.kind).join(", "),
            )),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
