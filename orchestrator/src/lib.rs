//! Swarm orchestrator library.
//!
//! Owns the durable record of live workers, the drivers that manage their
//! external resources (git worktrees, terminal-mux sessions, LM/tool-server
//! subprocesses), the per-kind lifecycle state machines, and the in-process
//! tool dispatcher that every tool-server subprocess calls into.
//!
//! Dependency order (leaves first): config/error → store, git, term → agent
//! → workflow → tool_dispatch.

#![allow(dead_code)]

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod git;
pub mod shell_safety;
pub mod store;
pub mod term;
pub mod tool_dispatch;
pub mod workflow;

pub use bootstrap::build_engine;
pub use config::SwarmConfig;
pub use error::{AgentError, GitError, StoreError, TermError, WorkflowError};
pub use store::{
    IssueRecord, Relationship, RelationshipKind, Store, ToolEvent, Worker, WorkerKind,
    WorkerStatus,
};
pub use tool_dispatch::ToolDispatch;
pub use workflow::{Drivers, WorkflowEngine};
