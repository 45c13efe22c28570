//! `tool-server` — the subprocess spawned once per worker by
//! `AgentDriver::start_tool_server` (spec.md §6, SPEC_FULL.md §1). One
//! binary, the worker kind selected at runtime by `--kind`; it opens the
//! same durable SQLite store `swarmctl` uses, restricts its MCP tool set to
//! the ones `orchestrator::tool_dispatch::permitted_tools` allows for that
//! kind, and serves them over the `rmcp` stdio transport — matching the
//! teacher's `coordination/src/main.rs` `main()` shape.

use anyhow::{Context, Result};
use clap::Parser;
use rmcp::ServiceExt;
use std::str::FromStr;
use tokio::io::{stdin, stdout};
use tool_server::{Args, ToolServer};

#[tokio::main]
async fn main() -> Result<()> {
    // MCP framing owns stdout; logs go to stderr, same as the teacher's
    // `coordination` binary.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let kind = orchestrator::WorkerKind::from_str(&args.kind).map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        worker_id = %args.agent_id,
        kind = %kind,
        workspace = %args.workspace,
        branch = %args.branch,
        "starting tool-server"
    );

    let config = orchestrator::SwarmConfig::from_env();
    let engine = orchestrator::build_engine(&config).context("building workflow engine")?;
    let dispatch = orchestrator::ToolDispatch::new(engine);

    let server = ToolServer::new(args.agent_id, kind, dispatch);

    let transport = (stdin(), stdout());
    let service = server.serve(transport).await.context("starting MCP transport")?;
    service.waiting().await.context("MCP transport failed")?;

    Ok(())
}
