//! Embedded baseline schema (§6). The orchestrator applies this once at
//! `Store::open`; it is not a migration chain — schema evolution is an
//! external collaborator's concern per spec.md §1.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workers (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('coding', 'review', 'planning')),
    status TEXT NOT NULL CHECK (status IN (
        'started', 'waiting_review', 'under_review', 'feedback_received',
        'creating_pr', 'completed', 'terminated', 'failed'
    )),
    worktree_path TEXT,
    branch TEXT,
    base_branch TEXT,
    session_name TEXT,
    lm_pid INTEGER,
    tool_server_pid INTEGER,
    issue_number INTEGER,
    system_prompt TEXT,
    parent_id TEXT REFERENCES workers(id),
    pr_number INTEGER,
    pr_url TEXT,
    created_at DATETIME NOT NULL,
    last_activity DATETIME NOT NULL,
    terminated_at DATETIME
);

CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id TEXT NOT NULL REFERENCES workers(id),
    child_id TEXT NOT NULL REFERENCES workers(id),
    kind TEXT NOT NULL CHECK (kind IN ('spawned_review', 'created_fork', 'planning_to_issue')),
    iteration INTEGER NOT NULL,
    created_at DATETIME NOT NULL,
    metadata TEXT,
    UNIQUE (parent_id, child_id, kind, iteration)
);

CREATE TABLE IF NOT EXISTS tool_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker_id TEXT NOT NULL REFERENCES workers(id),
    tool_name TEXT NOT NULL,
    success BOOLEAN NOT NULL,
    error TEXT,
    metadata TEXT,
    git_commit_hash TEXT,
    status_change TEXT,
    is_status_updating BOOLEAN NOT NULL,
    timestamp DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS issues (
    number INTEGER NOT NULL,
    repo_owner TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT,
    state TEXT NOT NULL,
    labels TEXT,
    created_at DATETIME NOT NULL,
    updated_at DATETIME NOT NULL,
    synced_at DATETIME NOT NULL,
    PRIMARY KEY (number, repo_owner, repo_name)
);

CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    encrypted BOOLEAN NOT NULL DEFAULT 0,
    updated_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workers_status ON workers(status);
CREATE INDEX IF NOT EXISTS idx_workers_last_activity ON workers(last_activity);
CREATE INDEX IF NOT EXISTS idx_relationships_parent_id ON relationships(parent_id);
CREATE INDEX IF NOT EXISTS idx_relationships_child_id ON relationships(child_id);
CREATE INDEX IF NOT EXISTS idx_tool_events_worker_id ON tool_events(worker_id);
CREATE INDEX IF NOT EXISTS idx_tool_events_timestamp ON tool_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_issues_state ON issues(state);
"#;
