//! Row types for the durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Coding,
    Review,
    Planning,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coding => write!(f, "coding"),
            Self::Review => write!(f, "review"),
            Self::Planning => write!(f, "planning"),
        }
    }
}

impl std::str::FromStr for WorkerKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coding" => Ok(Self::Coding),
            "review" => Ok(Self::Review),
            "planning" => Ok(Self::Planning),
            other => Err(format!("unknown worker kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Started,
    WaitingReview,
    UnderReview,
    FeedbackReceived,
    CreatingPr,
    Completed,
    Terminated,
    Failed,
}

impl WorkerStatus {
    /// A worker in any of these statuses must have all four resource
    /// handles populated (spec.md §3 invariant).
    pub fn requires_resources(self) -> bool {
        matches!(
            self,
            Self::Started
                | Self::WaitingReview
                | Self::UnderReview
                | Self::FeedbackReceived
                | Self::CreatingPr
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::WaitingReview => "waiting_review",
            Self::UnderReview => "under_review",
            Self::FeedbackReceived => "feedback_received",
            Self::CreatingPr => "creating_pr",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "waiting_review" => Ok(Self::WaitingReview),
            "under_review" => Ok(Self::UnderReview),
            "feedback_received" => Ok(Self::FeedbackReceived),
            "creating_pr" => Ok(Self::CreatingPr),
            "completed" => Ok(Self::Completed),
            "terminated" => Ok(Self::Terminated),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    SpawnedReview,
    CreatedFork,
    PlanningToIssue,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SpawnedReview => "spawned_review",
            Self::CreatedFork => "created_fork",
            Self::PlanningToIssue => "planning_to_issue",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RelationshipKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawned_review" => Ok(Self::SpawnedReview),
            "created_fork" => Ok(Self::CreatedFork),
            "planning_to_issue" => Ok(Self::PlanningToIssue),
            other => Err(format!("unknown relationship kind: {other}")),
        }
    }
}

/// The central entity: one AI coding-agent worker and its acquired resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub kind: WorkerKind,
    pub status: WorkerStatus,
    pub worktree_path: Option<String>,
    pub branch: Option<String>,
    pub base_branch: Option<String>,
    pub session_name: Option<String>,
    pub lm_pid: Option<i64>,
    pub tool_server_pid: Option<i64>,
    pub issue_number: Option<i64>,
    pub system_prompt: Option<String>,
    pub parent_id: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

impl Worker {
    /// All four resource handles populated.
    pub fn resources_populated(&self) -> bool {
        self.worktree_path.is_some()
            && self.branch.is_some()
            && self.session_name.is_some()
            && self.lm_pid.is_some()
            && self.tool_server_pid.is_some()
    }
}

/// A partial update applied transactionally to a single worker row.
/// `None` fields are left unchanged; resource handles use `Option<Option<T>>`
/// so a caller can distinguish "leave as-is" from "clear to null".
#[derive(Debug, Clone, Default)]
pub struct WorkerPatch {
    pub status: Option<WorkerStatus>,
    pub worktree_path: Option<Option<String>>,
    pub branch: Option<Option<String>>,
    pub base_branch: Option<Option<String>>,
    pub session_name: Option<Option<String>>,
    pub lm_pid: Option<Option<i64>>,
    pub tool_server_pid: Option<Option<i64>>,
    pub pr_number: Option<Option<i64>>,
    pub pr_url: Option<Option<String>>,
    pub terminated_at: Option<Option<DateTime<Utc>>>,
    pub touch_activity: bool,
}

/// Fields required to insert a new worker row.
#[derive(Debug, Clone)]
pub struct NewWorker {
    pub id: String,
    pub kind: WorkerKind,
    pub issue_number: Option<i64>,
    pub system_prompt: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerFilter {
    pub kinds: Vec<WorkerKind>,
    pub statuses: Vec<WorkerStatus>,
    pub parent_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: OrderBy,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    CreatedAt,
    LastActivity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// A directed edge between a parent and child worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub parent_id: String,
    pub child_id: String,
    pub kind: RelationshipKind,
    pub iteration: i64,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRelationship {
    pub parent_id: String,
    pub child_id: String,
    pub kind: RelationshipKind,
    pub iteration: i64,
    pub metadata: Option<String>,
}

/// Append-only audit record of one tool invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub id: i64,
    pub worker_id: String,
    pub tool_name: String,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Option<String>,
    pub git_commit_hash: Option<String>,
    pub status_change: Option<WorkerStatus>,
    pub is_status_updating: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewToolEvent {
    pub worker_id: String,
    pub tool_name: String,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: Option<String>,
    pub git_commit_hash: Option<String>,
    pub status_change: Option<WorkerStatus>,
    pub is_status_updating: bool,
}

/// Cached issue-tracker record (§6; optional cache, addressed only there).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub number: i64,
    pub repo_owner: String,
    pub repo_name: String,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub labels: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// Key/value user configuration cache (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub encrypted: bool,
    pub updated_at: DateTime<Utc>,
}
