//! The §6 "tool-server subprocess" as a library: one `ToolServer` type per
//! process, built from the CLI flags named in spec.md §6 and backed by
//! `orchestrator::tool_dispatch::ToolDispatch`. `main.rs` is a thin
//! `#[tokio::main]` binary that parses `Args`, builds a `ToolServer`, and
//! hands it to the `rmcp` stdio transport — mirroring the teacher's
//! `coordination/src/main.rs` split between library logic and transport glue.

pub mod server;

pub use server::{Args, ToolServer};
