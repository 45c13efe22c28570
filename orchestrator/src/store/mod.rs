//! Durable record of workers, parent/child links, and the tool-call audit
//! log. Backed by `rusqlite` (bundled SQLite) rather than a key-value store,
//! because the schema (§6) is relational with named tables and indexes.
//!
//! A single `rusqlite::Connection` is not `Sync`; it is wrapped in a
//! `Mutex` so the store can be shared behind an `Arc` across worker threads.
//! Each individual mutation acquires the mutex for the span of one
//! transaction, matching the "serialize per worker id" concurrency contract
//! closely enough for a single-host orchestrator (spec.md §5) without
//! introducing per-row locking of its own.

mod schema;
pub mod types;

pub use types::*;

use crate::error::StoreError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if absent) the sqlite database at `path` and apply
    /// the baseline schema. WAL mode lets the orchestrator CLI and every
    /// tool-server subprocess hold their own connection to the same file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn create_worker(&self, new: NewWorker) -> StoreResult<Worker> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let existing: Option<String> = conn
            .query_row("SELECT id FROM workers WHERE id = ?1", params![new.id], |r| r.get(0))
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::Conflict {
                worker_id: new.id,
                message: "worker id already exists".to_string(),
            });
        }

        conn.execute(
            "INSERT INTO workers (id, kind, status, issue_number, system_prompt, parent_id, created_at, last_activity)
             VALUES (?1, ?2, 'started', ?3, ?4, ?5, ?6, ?6)",
            params![
                new.id,
                new.kind.to_string(),
                new.issue_number,
                new.system_prompt,
                new.parent_id,
                now.to_rfc3339(),
            ],
        )?;

        drop(conn);
        self.get_worker(&new.id)?.ok_or_else(|| StoreError::NotFound(new.id))
    }

    pub fn update_worker(&self, id: &str, patch: WorkerPatch) -> StoreResult<Worker> {
        let conn = self.conn.lock().unwrap();
        let current_status: Option<String> = conn
            .query_row("SELECT status FROM workers WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        let Some(current_status) = current_status else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let current_status: WorkerStatus = current_status.parse().map_err(StoreError::Connection)?;
        if current_status.is_terminal() {
            return Err(StoreError::TerminalState {
                worker_id: id.to_string(),
            });
        }

        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = patch.status {
            sets.push("status = ?".to_string());
            values.push(Box::new(status.to_string()));
        }
        if let Some(worktree_path) = patch.worktree_path {
            sets.push("worktree_path = ?".to_string());
            values.push(Box::new(worktree_path));
        }
        if let Some(branch) = patch.branch {
            sets.push("branch = ?".to_string());
            values.push(Box::new(branch));
        }
        if let Some(base_branch) = patch.base_branch {
            sets.push("base_branch = ?".to_string());
            values.push(Box::new(base_branch));
        }
        if let Some(session_name) = patch.session_name {
            sets.push("session_name = ?".to_string());
            values.push(Box::new(session_name));
        }
        if let Some(lm_pid) = patch.lm_pid {
            sets.push("lm_pid = ?".to_string());
            values.push(Box::new(lm_pid));
        }
        if let Some(tool_server_pid) = patch.tool_server_pid {
            sets.push("tool_server_pid = ?".to_string());
            values.push(Box::new(tool_server_pid));
        }
        if let Some(pr_number) = patch.pr_number {
            sets.push("pr_number = ?".to_string());
            values.push(Box::new(pr_number));
        }
        if let Some(pr_url) = patch.pr_url {
            sets.push("pr_url = ?".to_string());
            values.push(Box::new(pr_url));
        }
        if let Some(terminated_at) = patch.terminated_at {
            sets.push("terminated_at = ?".to_string());
            values.push(Box::new(terminated_at.map(|t| t.to_rfc3339())));
        }
        if patch.touch_activity || !sets.is_empty() {
            sets.push("last_activity = ?".to_string());
            values.push(Box::new(Utc::now().to_rfc3339()));
        }

        if sets.is_empty() {
            drop(conn);
            return self.get_worker(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()));
        }

        let sql = format!("UPDATE workers SET {} WHERE id = ?", sets.join(", "));
        values.push(Box::new(id.to_string()));
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        conn.execute(&sql, param_refs.as_slice())?;

        drop(conn);
        self.get_worker(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Land cleanup's final write (§4.5.5 step 5), bypassing the
    /// terminal-state guard `update_worker` enforces: by the time cleanup
    /// runs, the worker may already sit in a terminal status (e.g.
    /// `completed` after a successful PR), and that write must still land
    /// `terminated_at` and, when every teardown step succeeded, null the
    /// resource handles so the "terminal ⇒ all handles null" invariant
    /// holds. `clear_handles` is false when a teardown step failed, leaving
    /// the leaked handle visible next to the cleanup-failure ToolEvent
    /// already logged for it.
    pub fn finalize_teardown(&self, id: &str, status: WorkerStatus, clear_handles: bool) -> StoreResult<Worker> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<String> = conn
            .query_row("SELECT id FROM workers WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let now = Utc::now().to_rfc3339();
        if clear_handles {
            conn.execute(
                "UPDATE workers SET status = ?1, worktree_path = NULL, branch = NULL,
                        base_branch = NULL, session_name = NULL, lm_pid = NULL,
                        tool_server_pid = NULL, terminated_at = ?2, last_activity = ?2
                 WHERE id = ?3",
                params![status.to_string(), now, id],
            )?;
        } else {
            conn.execute(
                "UPDATE workers SET status = ?1, terminated_at = ?2, last_activity = ?2 WHERE id = ?3",
                params![status.to_string(), now, id],
            )?;
        }
        drop(conn);
        self.get_worker(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn get_worker(&self, id: &str) -> StoreResult<Option<Worker>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, kind, status, worktree_path, branch, base_branch, session_name,
                    lm_pid, tool_server_pid, issue_number, system_prompt, parent_id,
                    pr_number, pr_url, created_at, last_activity, terminated_at
             FROM workers WHERE id = ?1",
            params![id],
            row_to_worker,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_workers(&self, filter: WorkerFilter) -> StoreResult<Vec<Worker>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT id, kind, status, worktree_path, branch, base_branch, session_name,
                    lm_pid, tool_server_pid, issue_number, system_prompt, parent_id,
                    pr_number, pr_url, created_at, last_activity, terminated_at
             FROM workers WHERE 1=1",
        );
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.kinds.is_empty() {
            let placeholders = filter.kinds.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND kind IN ({placeholders})"));
            for kind in &filter.kinds {
                values.push(Box::new(kind.to_string()));
            }
        }
        if !filter.statuses.is_empty() {
            let placeholders = filter.statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            for status in &filter.statuses {
                values.push(Box::new(status.to_string()));
            }
        }
        if let Some(parent_id) = &filter.parent_id {
            sql.push_str(" AND parent_id = ?");
            values.push(Box::new(parent_id.clone()));
        }

        let order_col = match filter.order_by {
            OrderBy::CreatedAt => "created_at",
            OrderBy::LastActivity => "last_activity",
        };
        let direction = match filter.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {order_col} {direction}"));

        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Box::new(limit));
        }
        if let Some(offset) = filter.offset {
            sql.push_str(" OFFSET ?");
            values.push(Box::new(offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_worker)?;
        let mut workers = Vec::new();
        for row in rows {
            workers.push(row?);
        }
        Ok(workers)
    }

    pub fn create_relationship(&self, rel: NewRelationship) -> StoreResult<Relationship> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let result = conn.execute(
            "INSERT INTO relationships (parent_id, child_id, kind, iteration, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rel.parent_id,
                rel.child_id,
                rel.kind.to_string(),
                rel.iteration,
                now.to_rfc3339(),
                rel.metadata,
            ],
        );
        match result {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                Ok(Relationship {
                    id,
                    parent_id: rel.parent_id,
                    child_id: rel.child_id,
                    kind: rel.kind,
                    iteration: rel.iteration,
                    created_at: now,
                    metadata: rel.metadata,
                })
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::RelationshipExists {
                    parent_id: rel.parent_id,
                    child_id: rel.child_id,
                    kind: rel.kind.to_string(),
                    iteration: rel.iteration,
                })
            }
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub fn get_relationships(&self, worker_id: &str) -> StoreResult<Vec<Relationship>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, parent_id, child_id, kind, iteration, created_at, metadata
             FROM relationships WHERE parent_id = ?1 OR child_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![worker_id], row_to_relationship)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn update_relationship_metadata(&self, id: i64, metadata: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE relationships SET metadata = ?1 WHERE id = ?2",
            params![metadata, id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("relationship {id}")));
        }
        Ok(())
    }

    /// Append-only; never fails except on store-offline (surfaced as
    /// `StoreError::Sqlite`/`Connection`).
    pub fn log_tool_event(&self, event: NewToolEvent) -> StoreResult<ToolEvent> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO tool_events (worker_id, tool_name, success, error, metadata,
                                       git_commit_hash, status_change, is_status_updating, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.worker_id,
                event.tool_name,
                event.success,
                event.error,
                event.metadata,
                event.git_commit_hash,
                event.status_change.map(|s| s.to_string()),
                event.is_status_updating,
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(ToolEvent {
            id,
            worker_id: event.worker_id,
            tool_name: event.tool_name,
            success: event.success,
            error: event.error,
            metadata: event.metadata,
            git_commit_hash: event.git_commit_hash,
            status_change: event.status_change,
            is_status_updating: event.is_status_updating,
            timestamp: now,
        })
    }

    /// Next free `number` for the given repo scope, so callers that mint
    /// local task records (rather than syncing a real hosting-site issue)
    /// don't collide on the `issues` table's `(number, repo_owner, repo_name)`
    /// primary key.
    pub fn next_issue_number(&self, repo_owner: &str, repo_name: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(number) FROM issues WHERE repo_owner = ?1 AND repo_name = ?2",
            params![repo_owner, repo_name],
            |r| r.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn create_issue(&self, issue: IssueRecord) -> StoreResult<IssueRecord> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO issues (number, repo_owner, repo_name, title, body, state, labels,
                                  created_at, updated_at, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                issue.number,
                issue.repo_owner,
                issue.repo_name,
                issue.title,
                issue.body,
                issue.state,
                issue.labels,
                issue.created_at.to_rfc3339(),
                issue.updated_at.to_rfc3339(),
                issue.synced_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(issue),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict {
                    worker_id: format!("{}/{}", issue.repo_owner, issue.repo_name),
                    message: format!("issue #{} already exists", issue.number),
                })
            }
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub fn backup(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let mut dst = Connection::open(path.as_ref())?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dst)?;
        backup.run_to_completion(5, std::time::Duration::from_millis(250), None)?;
        Ok(())
    }

    pub fn vacuum(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA incremental_vacuum; VACUUM;")?;
        Ok(())
    }
}

fn row_to_worker(row: &Row) -> rusqlite::Result<Worker> {
    let kind: String = row.get(1)?;
    let status: String = row.get(2)?;
    let created_at: String = row.get(14)?;
    let last_activity: String = row.get(15)?;
    let terminated_at: Option<String> = row.get(16)?;

    Ok(Worker {
        id: row.get(0)?,
        kind: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        worktree_path: row.get(3)?,
        branch: row.get(4)?,
        base_branch: row.get(5)?,
        session_name: row.get(6)?,
        lm_pid: row.get(7)?,
        tool_server_pid: row.get(8)?,
        issue_number: row.get(9)?,
        system_prompt: row.get(10)?,
        parent_id: row.get(11)?,
        pr_number: row.get(12)?,
        pr_url: row.get(13)?,
        created_at: parse_rfc3339(&created_at)?,
        last_activity: parse_rfc3339(&last_activity)?,
        terminated_at: terminated_at.map(|s| parse_rfc3339(&s)).transpose()?,
    })
}

fn row_to_relationship(row: &Row) -> rusqlite::Result<Relationship> {
    let kind: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(Relationship {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        child_id: row.get(2)?,
        kind: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        iteration: row.get(4)?,
        created_at: parse_rfc3339(&created_at)?,
        metadata: row.get(6)?,
    })
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_worker(id: &str, kind: WorkerKind) -> NewWorker {
        NewWorker {
            id: id.to_string(),
            kind,
            issue_number: None,
            system_prompt: None,
            parent_id: None,
        }
    }

    #[test]
    fn create_and_get_worker() {
        let store = Store::open_in_memory().unwrap();
        let worker = store.create_worker(new_worker("w1", WorkerKind::Coding)).unwrap();
        assert_eq!(worker.status, WorkerStatus::Started);
        assert!(!worker.resources_populated());

        let fetched = store.get_worker("w1").unwrap().unwrap();
        assert_eq!(fetched.id, "w1");
    }

    #[test]
    fn duplicate_id_conflicts() {
        let store = Store::open_in_memory().unwrap();
        store.create_worker(new_worker("w1", WorkerKind::Coding)).unwrap();
        let err = store.create_worker(new_worker("w1", WorkerKind::Coding)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn update_worker_populates_resources() {
        let store = Store::open_in_memory().unwrap();
        store.create_worker(new_worker("w1", WorkerKind::Coding)).unwrap();

        let patch = WorkerPatch {
            worktree_path: Some(Some("/tmp/w1".into())),
            branch: Some(Some("swarm/w1".into())),
            session_name: Some(Some("w1".into())),
            lm_pid: Some(Some(123)),
            tool_server_pid: Some(Some(124)),
            ..Default::default()
        };
        let worker = store.update_worker("w1", patch).unwrap();
        assert!(worker.resources_populated());
    }

    #[test]
    fn terminal_worker_rejects_mutation() {
        let store = Store::open_in_memory().unwrap();
        store.create_worker(new_worker("w1", WorkerKind::Coding)).unwrap();
        store
            .update_worker(
                "w1",
                WorkerPatch {
                    status: Some(WorkerStatus::Completed),
                    terminated_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = store
            .update_worker(
                "w1",
                WorkerPatch {
                    status: Some(WorkerStatus::Started),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::TerminalState { .. }));
    }

    #[test]
    fn update_missing_worker_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.update_worker("missing", WorkerPatch::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn relationship_round_trip_and_uniqueness() {
        let store = Store::open_in_memory().unwrap();
        store.create_worker(new_worker("parent", WorkerKind::Coding)).unwrap();
        store.create_worker(new_worker("child", WorkerKind::Review)).unwrap();

        let rel = store
            .create_relationship(NewRelationship {
                parent_id: "parent".into(),
                child_id: "child".into(),
                kind: RelationshipKind::SpawnedReview,
                iteration: 1,
                metadata: None,
            })
            .unwrap();
        assert_eq!(rel.iteration, 1);

        let err = store
            .create_relationship(NewRelationship {
                parent_id: "parent".into(),
                child_id: "child".into(),
                kind: RelationshipKind::SpawnedReview,
                iteration: 1,
                metadata: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::RelationshipExists { .. }));

        let edges = store.get_relationships("parent").unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn list_workers_filters_and_orders() {
        let store = Store::open_in_memory().unwrap();
        store.create_worker(new_worker("c1", WorkerKind::Coding)).unwrap();
        store.create_worker(new_worker("c2", WorkerKind::Coding)).unwrap();
        store.create_worker(new_worker("p1", WorkerKind::Planning)).unwrap();

        let coding = store
            .list_workers(WorkerFilter {
                kinds: vec![WorkerKind::Coding],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(coding.len(), 2);

        let limited = store
            .list_workers(WorkerFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn tool_event_is_append_only() {
        let store = Store::open_in_memory().unwrap();
        store.create_worker(new_worker("w1", WorkerKind::Coding)).unwrap();
        let event = store
            .log_tool_event(NewToolEvent {
                worker_id: "w1".into(),
                tool_name: "request_review".into(),
                success: true,
                error: None,
                metadata: None,
                git_commit_hash: None,
                status_change: Some(WorkerStatus::WaitingReview),
                is_status_updating: true,
            })
            .unwrap();
        assert!(event.id > 0);
    }

    #[test]
    fn issue_numbers_are_scoped_per_repo_and_monotonic() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.next_issue_number("acme", "widgets").unwrap(), 1);

        let make = |number: i64| IssueRecord {
            number,
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            title: "t".into(),
            body: None,
            state: "open".into(),
            labels: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            synced_at: Utc::now(),
        };

        store.create_issue(make(1)).unwrap();
        assert_eq!(store.next_issue_number("acme", "widgets").unwrap(), 2);
        assert_eq!(store.next_issue_number("acme", "gadgets").unwrap(), 1);

        let err = store.create_issue(make(1)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
