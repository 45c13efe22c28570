//! In-process handler every tool-server subprocess calls into.
//!
//! Generalizes the teacher's `agent_profile.rs` capability matrix (4 swarm
//! roles × tool categories) into the spec's 3 worker kinds × 5 concrete
//! tools, and validates arguments the way `harness::tools::HarnessStartRequest`
//! et al. do: a `schemars::JsonSchema`-derived request struct per tool,
//! decoded with `serde_json::from_value`. A call that fails schema
//! validation, caller validation, or permission validation never reaches
//! `WorkflowEngine`; a call that does reach it always produces exactly one
//! `ToolEvent`, success or failure, in addition to whatever status-change
//! events the engine itself logs (spec.md §4.6, §7).

use crate::store::{NewToolEvent, WorkerKind};
use crate::workflow::{PullRequestRequest, ReviewSpawnRequest, WorkflowEngine};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The five tools named in spec.md §4.6, keyed by name.
pub const TOOL_REQUEST_REVIEW: &str = "request_review";
pub const TOOL_CREATE_PULL_REQUEST: &str = "create_pull_request";
pub const TOOL_REQUEST_CHANGES: &str = "request_changes";
pub const TOOL_CREATE_TASK: &str = "create_task";
pub const TOOL_ANALYZE_REPOSITORY: &str = "analyze_repository";

/// Per-kind permitted-tool table (spec.md §4.6).
pub fn permitted_tools(kind: WorkerKind) -> &'static [&'static str] {
    match kind {
        WorkerKind::Coding => &[TOOL_REQUEST_REVIEW, TOOL_CREATE_PULL_REQUEST],
        WorkerKind::Review => &[TOOL_REQUEST_CHANGES, TOOL_CREATE_PULL_REQUEST],
        WorkerKind::Planning => &[TOOL_CREATE_TASK, TOOL_ANALYZE_REPOSITORY],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RequestReviewArgs {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreatePullRequestArgs {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RequestChangesArgs {
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateTaskArgs {
    pub title: String,
    pub description: String,
    pub priority: String,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeRepositoryArgs {
    pub scope: String,
    pub depth: String,
}

/// A single `{type: "text", text: "..."}` content item, matching the MCP
/// tool-call response shape named in spec.md §6.
#[derive(Debug, Clone, Serialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ContentItem {
    fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// `{content: [...], isError?: bool}` — the full tool-call response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", skip_serializing_if = "is_false")]
    pub is_error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolResponse {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            is_error: true,
        }
    }
}

/// In-process dispatcher; one instance is shared (via `Arc`) by the tool
/// handlers a tool-server subprocess registers with its MCP transport.
pub struct ToolDispatch {
    engine: WorkflowEngine,
}

impl ToolDispatch {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Dispatch one tool call. Never panics into the subprocess boundary:
    /// every failure path returns a `ToolResponse` with `is_error = true`
    /// rather than propagating a Rust error to the caller.
    pub fn dispatch(&self, worker_id: &str, tool_name: &str, arguments: Value) -> ToolResponse {
        let caller = match self.engine.store().get_worker(worker_id) {
            Ok(Some(w)) if !w.status.is_terminal() => w,
            Ok(_) => {
                self.log_event(worker_id, tool_name, false, Some("unknown or terminal tool caller"));
                return ToolResponse::error(format!(
                    "[unknown-tool-caller] worker '{worker_id}' is unknown or has already terminated"
                ));
            }
            Err(e) => {
                self.log_event(worker_id, tool_name, false, Some(&e.to_string()));
                return ToolResponse::error(e.to_string());
            }
        };

        if !permitted_tools(caller.kind).contains(&tool_name) {
            let message = format!(
                "[tool-forbidden] tool '{tool_name}' is not permitted for worker kind '{}'",
                caller.kind
            );
            self.log_event(worker_id, tool_name, false, Some(&message));
            return ToolResponse::error(message);
        }

        let result = match tool_name {
            TOOL_REQUEST_REVIEW => self.dispatch_request_review(worker_id, arguments),
            TOOL_CREATE_PULL_REQUEST => self.dispatch_create_pull_request(worker_id, arguments),
            TOOL_REQUEST_CHANGES => self.dispatch_request_changes(worker_id, arguments),
            TOOL_CREATE_TASK => self.dispatch_create_task(worker_id, arguments),
            TOOL_ANALYZE_REPOSITORY => self.dispatch_analyze_repository(worker_id, arguments),
            other => Err(format!("[tool-forbidden] unknown tool '{other}'")),
        };

        match result {
            Ok(text) => {
                self.log_event(worker_id, tool_name, true, None);
                ToolResponse::ok(text)
            }
            Err(message) => {
                self.log_event(worker_id, tool_name, false, Some(&message));
                ToolResponse::error(message)
            }
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(tool_name: &str, arguments: Value) -> Result<T, String> {
        serde_json::from_value(arguments)
            .map_err(|e| format!("[invalid-arguments] tool '{tool_name}' arguments: {e}"))
    }

    fn dispatch_request_review(&self, worker_id: &str, arguments: Value) -> Result<String, String> {
        let args: RequestReviewArgs = Self::decode(TOOL_REQUEST_REVIEW, arguments)?;
        let worker = self
            .engine
            .request_review(worker_id)
            .map_err(|e| e.to_structured().to_string())?;
        Ok(format!(
            "requested review ({}); worker {} is now {}",
            args.description, worker.id, worker.status
        ))
    }

    fn dispatch_create_pull_request(&self, worker_id: &str, arguments: Value) -> Result<String, String> {
        let args: CreatePullRequestArgs = Self::decode(TOOL_CREATE_PULL_REQUEST, arguments)?;
        let worker = self
            .engine
            .create_pull_request(
                worker_id,
                PullRequestRequest {
                    title: args.title,
                    body: args.body,
                    draft: args.draft,
                },
            )
            .map_err(|e| e.to_structured().to_string())?;
        Ok(format!(
            "pull request created: {}",
            worker.pr_url.unwrap_or_default()
        ))
    }

    fn dispatch_request_changes(&self, worker_id: &str, arguments: Value) -> Result<String, String> {
        let args: RequestChangesArgs = Self::decode(TOOL_REQUEST_CHANGES, arguments)?;
        self.engine
            .request_changes(worker_id, &args.feedback)
            .map_err(|e| e.to_structured().to_string())?;
        Ok("changes requested; parent worker resumed".to_string())
    }

    fn dispatch_create_task(&self, worker_id: &str, arguments: Value) -> Result<String, String> {
        let args: CreateTaskArgs = Self::decode(TOOL_CREATE_TASK, arguments)?;
        // `repo_owner`/`repo_name` are resolved by the engine from the
        // caller's own worktree remote (or a `local` scope if it has none);
        // the number is assigned there too, to avoid a PK collision on the
        // `issues` table.
        let issue = crate::store::IssueRecord {
            number: 0,
            repo_owner: String::new(),
            repo_name: String::new(),
            title: args.title.clone(),
            body: Some(args.description),
            state: "open".to_string(),
            labels: Some(args.priority),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            synced_at: chrono::Utc::now(),
        };
        let recorded = self
            .engine
            .create_task(worker_id, issue)
            .map_err(|e| e.to_structured().to_string())?;
        Ok(format!(
            "task created: {} ({}/{}#{})",
            args.title, recorded.repo_owner, recorded.repo_name, recorded.number
        ))
    }

    fn dispatch_analyze_repository(&self, worker_id: &str, arguments: Value) -> Result<String, String> {
        let args: AnalyzeRepositoryArgs = Self::decode(TOOL_ANALYZE_REPOSITORY, arguments)?;
        let report = self
            .engine
            .analyze_repository(worker_id, &args.scope, &args.depth)
            .map_err(|e| e.to_structured().to_string())?;
        serde_json::to_string(&report).map_err(|e| format!("[invalid-arguments] failed to serialize report: {e}"))
    }

    fn log_event(&self, worker_id: &str, tool_name: &str, success: bool, error: Option<&str>) {
        let _ = self.engine.store().log_tool_event(NewToolEvent {
            worker_id: worker_id.to_string(),
            tool_name: tool_name.to_string(),
            success,
            error: error.map(str::to_string),
            metadata: None,
            git_commit_hash: None,
            status_change: None,
            is_status_updating: false,
        });
    }
}

/// `spawn_review` is not itself a tool a worker invokes — the coding worker
/// calls `request_review`, and `WorkflowEngine::request_review` drives the
/// spawn protocol internally — but reused directly by `swarmctl` for manual
/// review spawning from the CLI (spec.md's "external trigger").
pub fn spawn_review_request(parent_id: String, review_prompt: Option<String>, issue: Option<i64>) -> ReviewSpawnRequest {
    ReviewSpawnRequest {
        parent_id,
        review_prompt,
        issue,
    }
}
