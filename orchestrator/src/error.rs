//! Error taxonomy for the orchestrator.
//!
//! One `thiserror` enum per component, matching the flat `component_*` kind
//! taxonomy: each variant carries enough structure to build a
//! [`StructuredError`] response without parsing the display message.
//! `StructuredError` is what `ToolDispatch` serializes back to a tool-server
//! subprocess on failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Agent-facing structured error response. Every driver/workflow error is
/// converted to one of these before it crosses the ToolDispatch boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl StructuredError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, component: &'static str) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            component: component.to_string(),
            details: HashMap::new(),
            timestamp: Utc::now(),
            suggestion: None,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Trait implemented by every component error enum so ToolDispatch and
/// WorkflowEngine can convert uniformly without matching on concrete types.
pub trait ToStructured {
    fn code(&self) -> &'static str;
    fn component(&self) -> &'static str;
    fn is_retryable(&self) -> bool {
        false
    }
    fn suggestion(&self) -> Option<String> {
        None
    }

    fn to_structured(&self) -> StructuredError
    where
        Self: std::fmt::Display,
    {
        let mut s = StructuredError::new(self.code(), self.to_string(), self.component());
        if let Some(sugg) = self.suggestion() {
            s = s.with_suggestion(sugg);
        }
        s
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection unavailable: {0}")]
    Connection(String),
    #[error("store conflict updating worker {worker_id}: {message}")]
    Conflict { worker_id: String, message: String },
    #[error("worker not found: {0}")]
    NotFound(String),
    #[error("worker {worker_id} is terminated and cannot be mutated")]
    TerminalState { worker_id: String },
    #[error("relationship already exists: parent={parent_id} child={child_id} kind={kind} iteration={iteration}")]
    RelationshipExists {
        parent_id: String,
        child_id: String,
        kind: String,
        iteration: i64,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ToStructured for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "store-connection",
            Self::Conflict { .. } => "store-conflict",
            Self::NotFound(_) => "store-not-found",
            Self::TerminalState { .. } => "store-not-found",
            Self::RelationshipExists { .. } => "store-conflict",
            Self::Sqlite(_) => "store-connection",
        }
    }
    fn component(&self) -> &'static str {
        "store"
    }
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Sqlite(_))
    }
    fn suggestion(&self) -> Option<String> {
        match self {
            Self::Connection(_) | Self::Sqlite(_) => {
                Some("Retry once the store becomes reachable again.".into())
            }
            Self::NotFound(id) => Some(format!("Verify worker id '{id}' was returned by launch.")),
            Self::TerminalState { .. } => {
                Some("This worker has already terminated; no further mutations are possible.".into())
            }
            Self::Conflict { .. } => Some("Retry the mutation; another writer won the race.".into()),
            Self::RelationshipExists { .. } => {
                Some("Relationship already recorded; this is usually a duplicate call.".into())
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum GitError {
    #[error("not a valid repository at {path}")]
    RepoInvalid { path: String },
    #[error("branch already exists: {branch}")]
    BranchExists { branch: String },
    #[error("working tree is dirty at {path}")]
    WorkingTreeDirty { path: String },
    #[error("git {operation} failed: {message}")]
    CommandFailed { operation: String, message: String },
    #[error("remote url could not be parsed: {url}")]
    InvalidRemote { url: String },
    #[error("branch name '{name}' exceeds 250 runes")]
    InvalidBranchName { name: String },
    #[error("worktree capacity exceeded: {current}/{max}")]
    Capacity { current: usize, max: usize },
}

impl ToStructured for GitError {
    fn code(&self) -> &'static str {
        match self {
            Self::RepoInvalid { .. } => "git-repo-invalid",
            Self::BranchExists { .. } => "git-branch-exists",
            Self::WorkingTreeDirty { .. } => "git-working-tree-dirty",
            Self::CommandFailed { .. } => "git-command-failed",
            Self::InvalidRemote { .. } => "git-invalid-remote",
            Self::InvalidBranchName { .. } => "git-invalid-branch-name",
            Self::Capacity { .. } => "capacity",
        }
    }
    fn component(&self) -> &'static str {
        "git"
    }
    fn is_retryable(&self) -> bool {
        matches!(self, Self::CommandFailed { message, .. } if message.to_lowercase().contains("lock"))
    }
    fn suggestion(&self) -> Option<String> {
        match self {
            Self::RepoInvalid { path } => Some(format!("Verify {path} is a git repository (git init or clone it first).")),
            Self::BranchExists { branch } => Some(format!("Use a different branch name than '{branch}'.")),
            Self::WorkingTreeDirty { .. } => Some("Commit or discard changes before this operation.".into()),
            Self::CommandFailed { message, .. } if message.to_lowercase().contains("lock") => {
                Some("A git lock file conflict occurred; retry shortly.".into())
            }
            Self::CommandFailed { .. } => Some("Inspect the worker's worktree with `git status`.".into()),
            Self::InvalidRemote { .. } => Some("Remote host is not in the configured supported-hosts set.".into()),
            Self::InvalidBranchName { .. } => Some("Shorten the branch name to 250 runes or fewer.".into()),
            Self::Capacity { max, .. } => Some(format!("At most {max} concurrent worktrees are allowed; wait for one to finish.")),
        }
    }
}

#[derive(Error, Debug)]
pub enum TermError {
    #[error("terminal mux binary not available on PATH")]
    NotAvailable,
    #[error("invalid session name: {name}")]
    InvalidName { name: String },
    #[error("invalid working directory: {path}")]
    InvalidDirectory { path: String },
    #[error("session already exists: {name}")]
    SessionExists { name: String },
    #[error("session not found: {name}")]
    SessionNotFound { name: String },
    #[error("no tty available to attach session {name}")]
    NoTty { name: String },
}

impl ToStructured for TermError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotAvailable => "term-not-available",
            Self::InvalidName { .. } => "term-invalid-name",
            Self::InvalidDirectory { .. } => "term-invalid-directory",
            Self::SessionExists { .. } => "term-session-exists",
            Self::SessionNotFound { .. } => "term-session-not-found",
            Self::NoTty { .. } => "term-no-tty",
        }
    }
    fn component(&self) -> &'static str {
        "term"
    }
    fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotAvailable => Some("Install the terminal multiplexer binary and ensure it resolves on PATH.".into()),
            Self::InvalidName { .. } => Some("Session names must match [A-Za-z0-9_-]{1,100}.".into()),
            Self::InvalidDirectory { .. } => Some("Working directory must be an absolute path with no .. segments.".into()),
            Self::SessionExists { name } => Some(format!("Kill session '{name}' first, or choose a different worker id.")),
            Self::SessionNotFound { .. } => Some("The session may already have been cleaned up.".into()),
            Self::NoTty { .. } => Some("This operation requires an interactive attach, which is unavailable here.".into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LM CLI not found on PATH")]
    LmNotFound,
    #[error("LM launch failed: {message}")]
    LmLaunchFailed { message: String },
    #[error("LM session not found: {session}")]
    LmSessionNotFound { session: String },
    #[error("LM operation timed out after {timeout_ms}ms")]
    LmTimeout { timeout_ms: u64 },
    #[error("tool-server launch failed: {message}")]
    ToolServerLaunchFailed { message: String },
}

impl ToStructured for AgentError {
    fn code(&self) -> &'static str {
        match self {
            Self::LmNotFound => "lm-not-found",
            Self::LmLaunchFailed { .. } => "lm-launch-failed",
            Self::LmSessionNotFound { .. } => "lm-session-not-found",
            Self::LmTimeout { .. } => "lm-timeout",
            Self::ToolServerLaunchFailed { .. } => "lm-launch-failed",
        }
    }
    fn component(&self) -> &'static str {
        "agent"
    }
    fn is_retryable(&self) -> bool {
        matches!(self, Self::LmTimeout { .. })
    }
    fn suggestion(&self) -> Option<String> {
        match self {
            Self::LmNotFound => Some("Ensure the LM CLI binary is installed and resolves on PATH.".into()),
            Self::LmLaunchFailed { .. } | Self::ToolServerLaunchFailed { .. } => {
                Some("Check subprocess stderr in the worker's terminal session.".into())
            }
            Self::LmSessionNotFound { .. } => Some("The terminal session may have been killed externally.".into()),
            Self::LmTimeout { .. } => Some("Increase LM_TIMEOUT_MS or retry.".into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("parent worker not found: {parent_id}")]
    ParentNotFound { parent_id: String },
    #[error("parent worker {parent_id} is in state '{status}', expected '{expected}'")]
    ParentInvalidState {
        parent_id: String,
        status: String,
        expected: String,
    },
    #[error("worker instance not found: {worker_id}")]
    InstanceNotFound { worker_id: String },
    #[error("cleanup failed for worker {worker_id}: {message}")]
    CleanupFailed { worker_id: String, message: String },
    #[error("pull request creation failed for worker {worker_id}: {message}")]
    PrCreationFailed { worker_id: String, message: String },
    #[error("launch failed for worker {worker_id}: {source}")]
    LaunchFailed {
        worker_id: String,
        #[source]
        source: Box<WorkflowError>,
    },
    #[error("tool '{tool_name}' is not permitted for worker kind '{kind}'")]
    ToolForbidden { tool_name: String, kind: String },
    #[error("invalid arguments for tool '{tool_name}': {message}")]
    InvalidArguments { tool_name: String, message: String },
    #[error("unknown or terminal tool caller: {worker_id}")]
    UnknownToolCaller { worker_id: String },
    #[error("illegal state transition for worker {worker_id}: {from} -> {to}")]
    InvalidState {
        worker_id: String,
        from: String,
        to: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Term(#[from] TermError),
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl ToStructured for WorkflowError {
    fn code(&self) -> &'static str {
        match self {
            Self::ParentNotFound { .. } => "workflow-parent-not-found",
            Self::ParentInvalidState { .. } => "workflow-parent-invalid-state",
            Self::InstanceNotFound { .. } => "workflow-instance-not-found",
            Self::CleanupFailed { .. } => "workflow-cleanup-failed",
            Self::PrCreationFailed { .. } => "workflow-pr-creation-failed",
            Self::LaunchFailed { .. } => "workflow-launch-failed",
            Self::ToolForbidden { .. } => "tool-forbidden",
            Self::InvalidArguments { .. } => "invalid-arguments",
            Self::UnknownToolCaller { .. } => "unknown-tool-caller",
            Self::InvalidState { .. } => "invalid-state",
            Self::Store(e) => e.code(),
            Self::Git(e) => e.code(),
            Self::Term(e) => e.code(),
            Self::Agent(e) => e.code(),
        }
    }
    fn component(&self) -> &'static str {
        match self {
            Self::Store(e) => e.component(),
            Self::Git(e) => e.component(),
            Self::Term(e) => e.component(),
            Self::Agent(e) => e.component(),
            _ => "workflow",
        }
    }
    fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Git(e) => e.is_retryable(),
            Self::Term(e) => e.is_retryable(),
            Self::Agent(e) => e.is_retryable(),
            _ => false,
        }
    }
    fn suggestion(&self) -> Option<String> {
        match self {
            Self::ParentNotFound { .. } => Some("Verify the parent worker id came from a coding worker's launch response.".into()),
            Self::ParentInvalidState { expected, .. } => {
                Some(format!("Wait until the parent reaches '{expected}' before calling this tool."))
            }
            Self::InstanceNotFound { .. } => Some("The worker id is unknown to the store.".into()),
            Self::CleanupFailed { .. } => Some("Retry cleanup; a leaked resource handle will be retried by operator tooling.".into()),
            Self::PrCreationFailed { .. } => Some("Check hosting-site credentials and retry create_pull_request.".into()),
            Self::LaunchFailed { source, .. } => source.suggestion(),
            Self::ToolForbidden { kind, .. } => Some(format!("This tool is not in the permitted set for worker kind '{kind}'.")),
            Self::InvalidArguments { .. } => Some("Check the tool's required fields and argument types.".into()),
            Self::UnknownToolCaller { .. } => Some("The calling worker_id is unknown or has already terminated.".into()),
            Self::InvalidState { .. } => Some("This operation is not legal from the worker's current status.".into()),
            Self::Store(e) => e.suggestion(),
            Self::Git(e) => e.suggestion(),
            Self::Term(e) => e.suggestion(),
            Self::Agent(e) => e.suggestion(),
        }
    }
}

impl WorkflowError {
    pub fn to_structured(&self) -> StructuredError {
        let mut s = StructuredError::new(self.code(), self.to_string(), self.component());
        if let Some(sugg) = self.suggestion() {
            s = s.with_suggestion(sugg);
        }
        s
    }
}
