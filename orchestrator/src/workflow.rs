//! The per-kind lifecycle state machines and the launch/spawn/cleanup
//! protocols that drive them. Generalizes the teacher's single
//! `OrchestratorState` + `is_legal_transition` table (`state_machine.rs`)
//! into three tables keyed by [`WorkerKind`], and replaces its injected-
//! trait-object collaborators with a composite [`Drivers`] struct per the
//! capability-interface redesign flag.

use crate::agent::{AgentDriver, StartLmRequest, StartToolServerRequest};
use crate::error::{TermError, WorkflowError};
use crate::git::{CreateWorktreeRequest, GitDriver};
use crate::store::{
    IssueRecord, NewRelationship, NewToolEvent, NewWorker, RelationshipKind, Store, Worker,
    WorkerKind, WorkerPatch, WorkerStatus,
};
use crate::term::{CreateSessionRequest, KillSessionOptions, TermDriver};
use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;

/// Composite of every capability the engine needs, so production wires
/// real drivers and tests can substitute fakes without trait objects.
pub struct Drivers {
    pub store: Store,
    pub git: GitDriver,
    pub term: TermDriver,
    pub agent: AgentDriver,
    pub lm_binary: String,
    pub tool_server_binary_coding: String,
    pub tool_server_binary_review: String,
    pub tool_server_binary_planning: String,
    pub review_prompt_template: String,
}

impl Drivers {
    fn tool_server_binary(&self, kind: WorkerKind) -> &str {
        match kind {
            WorkerKind::Coding => &self.tool_server_binary_coding,
            WorkerKind::Review => &self.tool_server_binary_review,
            WorkerKind::Planning => &self.tool_server_binary_planning,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub kind: WorkerKind,
    pub prompt: String,
    pub issue: Option<i64>,
    pub base_branch: String,
}

#[derive(Debug, Clone)]
pub struct ReviewSpawnRequest {
    pub parent_id: String,
    pub review_prompt: Option<String>,
    pub issue: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PullRequestRequest {
    pub title: String,
    pub body: String,
    pub draft: bool,
}

/// Structured report returned by the read-only `analyze_repository` tool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisReport {
    pub scope: String,
    pub depth: String,
    pub current_branch: String,
    pub head_commit: String,
    pub clean: bool,
    pub changed_files: usize,
    pub total_insertions: u64,
    pub total_deletions: u64,
}

/// Placeholder for the hosting-site pull-request creation collaborator;
/// a real implementation would call out to a REST API. Kept as a trait so
/// `WorkflowEngine` does not hardcode a single hosting site.
pub trait HostingSite: Send + Sync {
    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head_branch: &str,
        base_branch: &str,
        draft: bool,
    ) -> Result<(i64, String), String>;
}

/// Conservative default that always fails; callers supply a real
/// implementation via `WorkflowEngine::new`.
pub struct UnconfiguredHostingSite;

impl HostingSite for UnconfiguredHostingSite {
    fn create_pull_request(
        &self,
        _title: &str,
        _body: &str,
        _head_branch: &str,
        _base_branch: &str,
        _draft: bool,
    ) -> Result<(i64, String), String> {
        Err("no hosting-site collaborator configured".to_string())
    }
}

/// Real collaborator: a GitHub-shaped REST client, the way the teacher's
/// `RustClusterServer` talks to its LLM router over `reqwest::blocking`.
/// `base_url` is `HOSTING_API_URL` (e.g. `https://api.github.com`); the
/// `owner/repo` path segment comes from `GitDriver::parse_remote_url`.
pub struct GithubHostingSite {
    http: reqwest::blocking::Client,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
}

impl GithubHostingSite {
    pub fn new(base_url: String, token: String, owner: String, repo: String, timeout: std::time::Duration) -> Result<Self, String> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            http,
            base_url,
            token,
            owner,
            repo,
        })
    }
}

#[derive(serde::Serialize)]
struct CreatePrPayload<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
    draft: bool,
}

#[derive(serde::Deserialize)]
struct CreatePrResponse {
    number: i64,
    html_url: String,
}

impl HostingSite for GithubHostingSite {
    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head_branch: &str,
        base_branch: &str,
        draft: bool,
    ) -> Result<(i64, String), String> {
        let url = format!("{}/repos/{}/{}/pulls", self.base_url, self.owner, self.repo);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&CreatePrPayload {
                title,
                body,
                head: head_branch,
                base: base_branch,
                draft,
            })
            .send()
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(format!("hosting site returned {status}: {text}"));
        }

        let parsed: CreatePrResponse = response.json().map_err(|e| e.to_string())?;
        Ok((parsed.number, parsed.html_url))
    }
}

/// Per-worker-kind legal transition table, generalized from the teacher's
/// single `is_legal_transition` function (§4.5.1's three diagrams).
fn is_legal_transition(kind: WorkerKind, from: WorkerStatus, to: WorkerStatus) -> bool {
    use WorkerStatus::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    match kind {
        WorkerKind::Coding => matches!(
            (from, to),
            (Started, WaitingReview)
                | (Started, CreatingPr)
                | (WaitingReview, UnderReview)
                | (UnderReview, Started)
                | (UnderReview, Completed)
                | (FeedbackReceived, Started)
                | (CreatingPr, Completed)
                | (CreatingPr, Started)
        ),
        WorkerKind::Review => matches!((from, to), (Started, Terminated) | (Started, CreatingPr) | (CreatingPr, Completed)),
        WorkerKind::Planning => matches!((from, to), (Started, Completed)),
    }
}

pub struct WorkflowEngine {
    drivers: Drivers,
    hosting: Box<dyn HostingSite>,
    /// Serializes per-worker mutations so concurrent tool calls from
    /// different workers never interleave engine-level decisions about a
    /// single worker id (spec.md §5 "per worker: linearizable").
    worker_lock: Mutex<()>,
}

impl WorkflowEngine {
    pub fn new(drivers: Drivers, hosting: Box<dyn HostingSite>) -> Self {
        Self {
            drivers,
            hosting,
            worker_lock: Mutex::new(()),
        }
    }

    fn transition(&self, worker: &Worker, to: WorkerStatus) -> Result<Worker, WorkflowError> {
        if !is_legal_transition(worker.kind, worker.status, to) {
            return Err(WorkflowError::InvalidState {
                worker_id: worker.id.clone(),
                from: worker.status.to_string(),
                to: to.to_string(),
            });
        }
        let updated = self.drivers.store.update_worker(
            &worker.id,
            WorkerPatch {
                status: Some(to),
                touch_activity: true,
                ..Default::default()
            },
        )?;
        self.drivers.store.log_tool_event(NewToolEvent {
            worker_id: worker.id.clone(),
            tool_name: "__status_transition".to_string(),
            success: true,
            error: None,
            metadata: None,
            git_commit_hash: None,
            status_change: Some(to),
            is_status_updating: true,
        })?;
        Ok(updated)
    }

    /// §4.5.2 launch protocol, shared by coding and planning workers.
    pub fn launch(&self, req: LaunchRequest) -> Result<Worker, WorkflowError> {
        let _guard = self.worker_lock.lock().unwrap();
        let id = Uuid::new_v4().to_string();

        let worker = self.drivers.store.create_worker(NewWorker {
            id: id.clone(),
            kind: req.kind,
            issue_number: req.issue,
            system_prompt: Some(req.prompt.clone()),
            parent_id: None,
        })?;

        match self.acquire_resources(&worker, &req.base_branch, &req.prompt, None, None) {
            Ok(updated) => Ok(updated),
            Err(e) => {
                self.cleanup(&worker.id, true);
                Err(WorkflowError::LaunchFailed {
                    worker_id: worker.id,
                    source: Box::new(e),
                })
            }
        }
    }

    fn acquire_resources(
        &self,
        worker: &Worker,
        base_branch: &str,
        composed_prompt: &str,
        parent_id: Option<&str>,
        parent_session: Option<&str>,
    ) -> Result<Worker, WorkflowError> {
        let wt = self.drivers.git.create_worktree(CreateWorktreeRequest {
            name: worker.id.clone(),
            base_branch: base_branch.to_string(),
            branch: if worker.kind == WorkerKind::Review {
                Some(format!("review/{}", worker.id))
            } else {
                None
            },
        })?;

        self.drivers.term.create_session(CreateSessionRequest {
            name: worker.id.clone(),
            cwd: wt.path.display().to_string(),
            env: Vec::new(),
            initial_command: None,
        })?;

        let tool_server = self
            .drivers
            .agent
            .start_tool_server(StartToolServerRequest {
                worker_id: worker.id.clone(),
                kind: worker.kind,
                workspace: wt.path.display().to_string(),
                branch: wt.branch.clone(),
                session: worker.id.clone(),
                issue: worker.issue_number,
                parent_id: parent_id.map(str::to_string),
                parent_session: parent_session.map(str::to_string),
                binary: self.drivers.tool_server_binary(worker.kind).to_string(),
            })?;

        let lm_pid = self.drivers.agent.start_lm(StartLmRequest {
            workspace: wt.path.display().to_string(),
            session: worker.id.clone(),
            env: vec![
                ("INSTANCE_ID".to_string(), worker.id.clone()),
                ("MCP_SERVER_TYPE".to_string(), worker.kind.to_string()),
                ("MCP_AGENT_ID".to_string(), worker.id.clone()),
            ]
            .into_iter()
            .chain(parent_id.map(|p| ("PARENT_INSTANCE_ID".to_string(), p.to_string())))
            .collect(),
            binary: self.drivers.lm_binary.clone(),
        })?;

        std::thread::sleep(std::time::Duration::from_millis(200));
        self.drivers
            .term
            .send_keys(&worker.id, composed_prompt, true)?;

        let updated = self.drivers.store.update_worker(
            &worker.id,
            WorkerPatch {
                worktree_path: Some(Some(wt.path.display().to_string())),
                branch: Some(Some(wt.branch)),
                base_branch: Some(Some(base_branch.to_string())),
                session_name: Some(Some(worker.id.clone())),
                lm_pid: Some(Some(lm_pid)),
                tool_server_pid: Some(Some(tool_server.pid)),
                touch_activity: true,
                ..Default::default()
            },
        )?;

        std::mem::forget(tool_server);
        Ok(updated)
    }

    /// §4.5.3 review spawn protocol.
    pub fn spawn_review(&self, req: ReviewSpawnRequest) -> Result<Worker, WorkflowError> {
        let _guard = self.worker_lock.lock().unwrap();
        let parent = self
            .drivers
            .store
            .get_worker(&req.parent_id)?
            .ok_or_else(|| WorkflowError::ParentNotFound {
                parent_id: req.parent_id.clone(),
            })?;

        if parent.kind != WorkerKind::Coding || parent.status != WorkerStatus::WaitingReview {
            return Err(WorkflowError::ParentInvalidState {
                parent_id: parent.id.clone(),
                status: parent.status.to_string(),
                expected: WorkerStatus::WaitingReview.to_string(),
            });
        }

        let child_id = format!("{}-review-{}", parent.id, Uuid::new_v4());
        let base_branch = parent
            .branch
            .clone()
            .ok_or_else(|| WorkflowError::ParentInvalidState {
                parent_id: parent.id.clone(),
                status: parent.status.to_string(),
                expected: "resources populated".to_string(),
            })?;

        let child = self.drivers.store.create_worker(NewWorker {
            id: child_id.clone(),
            kind: WorkerKind::Review,
            issue_number: req.issue.or(parent.issue_number),
            system_prompt: req.review_prompt.clone(),
            parent_id: Some(parent.id.clone()),
        })?;

        let composed = format!(
            "{}\n\n{}\n\n{}",
            self.drivers.review_prompt_template,
            parent.system_prompt.clone().unwrap_or_default(),
            req.review_prompt.unwrap_or_default()
        );

        let updated_child = match self.acquire_resources(
            &child,
            &base_branch,
            &composed,
            Some(&parent.id),
            parent.session_name.as_deref(),
        ) {
            Ok(updated) => updated,
            Err(e) => {
                self.cleanup(&child.id, true);
                return Err(WorkflowError::LaunchFailed {
                    worker_id: child.id,
                    source: Box::new(e),
                });
            }
        };

        let existing = self.drivers.store.get_relationships(&parent.id)?;
        let next_iteration = existing
            .iter()
            .filter(|r| r.kind == RelationshipKind::SpawnedReview && r.parent_id == parent.id)
            .map(|r| r.iteration)
            .max()
            .unwrap_or(0)
            + 1;

        self.drivers.store.create_relationship(NewRelationship {
            parent_id: parent.id.clone(),
            child_id: child.id.clone(),
            kind: RelationshipKind::SpawnedReview,
            iteration: next_iteration,
            metadata: None,
        })?;

        self.transition(&parent, WorkerStatus::UnderReview)?;

        Ok(updated_child)
    }

    /// `request_review`, called by a coding worker.
    pub fn request_review(&self, worker_id: &str) -> Result<Worker, WorkflowError> {
        let _guard = self.worker_lock.lock().unwrap();
        let worker = self.load_non_terminal(worker_id)?;
        if worker.kind != WorkerKind::Coding {
            return Err(WorkflowError::ToolForbidden {
                tool_name: "request_review".to_string(),
                kind: worker.kind.to_string(),
            });
        }
        if worker.status == WorkerStatus::UnderReview {
            return Err(WorkflowError::InvalidState {
                worker_id: worker.id.clone(),
                from: worker.status.to_string(),
                to: WorkerStatus::WaitingReview.to_string(),
            });
        }
        drop(_guard);
        let updated = {
            let _guard = self.worker_lock.lock().unwrap();
            self.transition(&worker, WorkerStatus::WaitingReview)?
        };

        self.spawn_review(ReviewSpawnRequest {
            parent_id: updated.id.clone(),
            review_prompt: None,
            issue: updated.issue_number,
        })?;

        self.drivers
            .store
            .get_worker(worker_id)?
            .ok_or_else(|| WorkflowError::InstanceNotFound {
                worker_id: worker_id.to_string(),
            })
    }

    /// `request_changes`, called by a review worker.
    pub fn request_changes(&self, worker_id: &str, feedback: &str) -> Result<(), WorkflowError> {
        let review = self.load_non_terminal(worker_id)?;
        if review.kind != WorkerKind::Review {
            return Err(WorkflowError::ToolForbidden {
                tool_name: "request_changes".to_string(),
                kind: review.kind.to_string(),
            });
        }
        let parent_id = review
            .parent_id
            .clone()
            .ok_or_else(|| WorkflowError::ParentNotFound {
                parent_id: worker_id.to_string(),
            })?;
        let parent = self
            .drivers
            .store
            .get_worker(&parent_id)?
            .ok_or_else(|| WorkflowError::ParentNotFound {
                parent_id: parent_id.clone(),
            })?;

        let block = format!("\n=== CHANGES REQUESTED ===\n{feedback}\n=========================\n");
        let send_result = if let Some(session) = &parent.session_name {
            self.drivers.term.send_keys(session, &block, true)
        } else {
            Err(TermError::SessionNotFound {
                name: parent_id.clone(),
            })
        };

        if parent.status != WorkerStatus::Terminated {
            send_result?;
            let _guard = self.worker_lock.lock().unwrap();
            self.transition(&parent, WorkerStatus::FeedbackReceived)?;
            let parent = self.drivers.store.get_worker(&parent_id)?.ok_or_else(|| {
                WorkflowError::ParentNotFound {
                    parent_id: parent_id.clone(),
                }
            })?;
            self.transition(&parent, WorkerStatus::Started)?;
        } else {
            let _ = send_result;
            self.drivers.store.log_tool_event(NewToolEvent {
                worker_id: worker_id.to_string(),
                tool_name: "request_changes".to_string(),
                success: false,
                error: Some("parent already terminated; best-effort delivery".to_string()),
                metadata: None,
                git_commit_hash: None,
                status_change: None,
                is_status_updating: false,
            })?;
        }

        let relationships = self.drivers.store.get_relationships(&parent_id)?;
        if let Some(rel) = relationships
            .into_iter()
            .find(|r| r.child_id == worker_id && r.kind == RelationshipKind::SpawnedReview)
        {
            let metadata = serde_json::json!({
                "review": worker_id,
                "decision": "CHANGES_REQUESTED",
                "completed_at": Utc::now().to_rfc3339(),
            })
            .to_string();
            self.drivers.store.update_relationship_metadata(rel.id, &metadata)?;
        }

        self.cleanup(worker_id, false);
        Ok(())
    }

    /// `create_pull_request`, called by a coding or review worker.
    pub fn create_pull_request(
        &self,
        worker_id: &str,
        req: PullRequestRequest,
    ) -> Result<Worker, WorkflowError> {
        let worker = self.load_non_terminal(worker_id)?;
        if !matches!(worker.kind, WorkerKind::Coding | WorkerKind::Review) {
            return Err(WorkflowError::ToolForbidden {
                tool_name: "create_pull_request".to_string(),
                kind: worker.kind.to_string(),
            });
        }

        let worker = {
            let _guard = self.worker_lock.lock().unwrap();
            self.transition(&worker, WorkerStatus::CreatingPr)?
        };

        // A review worker publishes on the *parent's* branches (scenario 3,
        // spec.md §8): `head = coding.branch, base = coding.base_branch`,
        // and it is the parent, not the review worker, that ends up
        // `completed` with `pr_number`/`pr_url` populated.
        let target = if worker.kind == WorkerKind::Review {
            let parent_id = worker.parent_id.clone().ok_or_else(|| WorkflowError::ParentNotFound {
                parent_id: worker.id.clone(),
            })?;
            self.drivers
                .store
                .get_worker(&parent_id)?
                .ok_or_else(|| WorkflowError::ParentNotFound { parent_id })?
        } else {
            worker.clone()
        };

        let head_branch = target
            .branch
            .clone()
            .ok_or_else(|| WorkflowError::InstanceNotFound {
                worker_id: target.id.clone(),
            })?;
        let base_branch = target.base_branch.clone().unwrap_or_default();

        match self.hosting.create_pull_request(
            &req.title,
            &req.body,
            &head_branch,
            &base_branch,
            req.draft,
        ) {
            Ok((pr_number, pr_url)) => {
                self.drivers.store.update_worker(
                    &target.id,
                    WorkerPatch {
                        pr_number: Some(Some(pr_number)),
                        pr_url: Some(Some(pr_url)),
                        touch_activity: true,
                        ..Default::default()
                    },
                )?;
                let completed_target = self.transition(&target, WorkerStatus::Completed)?;
                self.cleanup(&completed_target.id, false);

                if worker.kind == WorkerKind::Review {
                    let completed_review = self.transition(&worker, WorkerStatus::Completed)?;
                    self.cleanup(&completed_review.id, false);
                }

                self.drivers.store.get_worker(&completed_target.id)?.ok_or_else(|| {
                    WorkflowError::InstanceNotFound {
                        worker_id: completed_target.id.clone(),
                    }
                })
            }
            Err(message) => {
                self.drivers.store.log_tool_event(NewToolEvent {
                    worker_id: worker.id.clone(),
                    tool_name: "create_pull_request".to_string(),
                    success: false,
                    error: Some(message.clone()),
                    metadata: None,
                    git_commit_hash: None,
                    status_change: None,
                    is_status_updating: false,
                })?;
                if worker.kind == WorkerKind::Coding {
                    self.transition(&worker, WorkerStatus::Started)?;
                }
                Err(WorkflowError::PrCreationFailed {
                    worker_id: worker.id,
                    message,
                })
            }
        }
    }

    /// `create_task`, called by a planning worker. Records `issue` into the
    /// `issues` cache (§6) before completing, numbering it against the
    /// worker's own repo when its remote resolves and against a `local`
    /// scope otherwise, so repeated calls never collide on the table's
    /// `(number, repo_owner, repo_name)` primary key.
    pub fn create_task(&self, worker_id: &str, issue: IssueRecord) -> Result<IssueRecord, WorkflowError> {
        let _guard = self.worker_lock.lock().unwrap();
        let worker = self.load_non_terminal(worker_id)?;
        if worker.kind != WorkerKind::Planning {
            return Err(WorkflowError::ToolForbidden {
                tool_name: "create_task".to_string(),
                kind: worker.kind.to_string(),
            });
        }

        let (repo_owner, repo_name) = worker
            .worktree_path
            .as_deref()
            .and_then(|path| self.drivers.git.validate_repo(path).ok())
            .and_then(|repo| repo.remote)
            .map(|remote| (remote.owner, remote.name))
            .unwrap_or_else(|| ("local".to_string(), worker.id.clone()));

        let number = self.drivers.store.next_issue_number(&repo_owner, &repo_name)?;
        let recorded = self.drivers.store.create_issue(IssueRecord {
            number,
            repo_owner,
            repo_name,
            ..issue
        })?;

        self.transition(&worker, WorkerStatus::Completed)?;
        self.cleanup(worker_id, false);
        Ok(recorded)
    }

    /// `analyze_repository`, called by a planning worker. Read-only: no
    /// Store mutation or status transition, per §4.6 ("all other tools
    /// have observable side effects ... `analyze_repository` is read-only").
    pub fn analyze_repository(
        &self,
        worker_id: &str,
        scope: &str,
        depth: &str,
    ) -> Result<AnalysisReport, WorkflowError> {
        let worker = self.load_non_terminal(worker_id)?;
        if worker.kind != WorkerKind::Planning {
            return Err(WorkflowError::ToolForbidden {
                tool_name: "analyze_repository".to_string(),
                kind: worker.kind.to_string(),
            });
        }
        let workspace = worker
            .worktree_path
            .clone()
            .ok_or_else(|| WorkflowError::InstanceNotFound {
                worker_id: worker_id.to_string(),
            })?;

        let repo = self.drivers.git.validate_repo(&workspace)?;
        let diff = self.drivers.git.diff(&workspace, None).ok();

        Ok(AnalysisReport {
            scope: scope.to_string(),
            depth: depth.to_string(),
            current_branch: repo.current_branch,
            head_commit: repo.head_commit,
            clean: repo.clean,
            changed_files: diff.as_ref().map(|d| d.files.len()).unwrap_or(0),
            total_insertions: diff.as_ref().map(|d| d.total_insertions).unwrap_or(0),
            total_deletions: diff.as_ref().map(|d| d.total_deletions).unwrap_or(0),
        })
    }

    /// Read-only access to the backing store, used by `ToolDispatch` to
    /// validate callers and log tool events without duplicating the
    /// connection it already holds.
    pub fn store(&self) -> &Store {
        &self.drivers.store
    }

    fn load_non_terminal(&self, worker_id: &str) -> Result<Worker, WorkflowError> {
        let worker = self
            .drivers
            .store
            .get_worker(worker_id)?
            .ok_or_else(|| WorkflowError::UnknownToolCaller {
                worker_id: worker_id.to_string(),
            })?;
        if worker.status.is_terminal() {
            return Err(WorkflowError::UnknownToolCaller {
                worker_id: worker_id.to_string(),
            });
        }
        Ok(worker)
    }

    /// §4.5.5 cleanup protocol: reverse-order, idempotent, best-effort.
    /// `force` marks the worker `failed` instead of preserving a
    /// completed/terminated status already reached.
    pub fn cleanup(&self, worker_id: &str, force: bool) {
        let worker = match self.drivers.store.get_worker(worker_id) {
            Ok(Some(w)) => w,
            _ => return,
        };

        let mut clean = true;

        if let Some(pid) = worker.tool_server_pid {
            if let Err(e) = self.drivers.agent.terminate_pid(pid) {
                self.log_cleanup_failure(worker_id, &e.to_string());
                clean = false;
            }
        }

        if let Some(pid) = worker.lm_pid {
            if let Err(e) = self.drivers.agent.terminate_pid(pid) {
                self.log_cleanup_failure(worker_id, &e.to_string());
                clean = false;
            }
        }

        if let Some(session) = &worker.session_name {
            if let Err(e) = self.drivers.term.kill_session(
                session,
                KillSessionOptions {
                    graceful_timeout_s: 10,
                    force: false,
                },
            ) {
                self.log_cleanup_failure(worker_id, &e.to_string());
                clean = false;
            }
        }

        if let Some(path) = &worker.worktree_path {
            if let Err(e) = self.drivers.git.remove_worktree(path) {
                self.log_cleanup_failure(worker_id, &e.to_string());
                clean = false;
            }
        }

        let final_status = if force {
            WorkerStatus::Failed
        } else if worker.status.is_terminal() {
            worker.status
        } else {
            WorkerStatus::Terminated
        };

        // Bypasses `update_worker`'s terminal-state guard: a `completed`/
        // `failed` worker's row must still receive `terminated_at`, and
        // every handle gets nulled unless a step above leaked one (in which
        // case the logged cleanup-failure ToolEvent is the record of it;
        // spec.md §8 "Resource conservation").
        let _ = self.drivers.store.finalize_teardown(worker_id, final_status, clean);
    }

    fn log_cleanup_failure(&self, worker_id: &str, message: &str) {
        let _ = self.drivers.store.log_tool_event(NewToolEvent {
            worker_id: worker_id.to_string(),
            tool_name: "__cleanup".to_string(),
            success: false,
            error: Some(message.to_string()),
            metadata: None,
            git_commit_hash: None,
            status_change: None,
            is_status_updating: false,
        });
    }
}
