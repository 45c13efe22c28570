//! `swarmctl` — the external trigger named in spec.md's control-flow
//! diagram. A thin CLI over `WorkflowEngine`: launch coding/review/planning
//! workers, list and inspect them, and terminate one out-of-band.
//!
//! Logging follows the teacher's `tracing_subscriber::fmt()` initialization;
//! errors propagate to `main` via `anyhow`, matching the teacher's split
//! between `thiserror` (library) and `anyhow` (binary edge).

use anyhow::Result;
use clap::{Parser, Subcommand};
use orchestrator::store::{Direction, OrderBy, WorkerFilter};
use orchestrator::workflow::{LaunchRequest, PullRequestRequest};
use orchestrator::{SwarmConfig, Worker, WorkerKind, WorkerStatus};
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "swarmctl", author, version, about = "Orchestrate coding/review/planning agent workers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a new coding or planning worker (review workers are spawned
    /// internally via `request_review`, never launched directly).
    Launch {
        /// coding | planning
        kind: String,
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        issue: Option<i64>,
        #[arg(long, default_value = "main")]
        base_branch: String,
    },
    /// List workers, optionally filtered by kind/status.
    List {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Show one worker's full record.
    Show { id: String },
    /// Run the cleanup protocol against a worker and mark it terminated.
    Terminate { id: String },
    /// Manually create a pull request on behalf of a worker (operator
    /// escape hatch; normally invoked via the `create_pull_request` tool).
    CreatePr {
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long, default_value_t = false)]
        draft: bool,
    },
    /// Manually spawn a review worker for a coding worker that is already
    /// `waiting_review` (operator escape hatch; normally driven internally
    /// by the `request_review` tool).
    SpawnReview {
        parent_id: String,
        #[arg(long)]
        review_prompt: Option<String>,
    },
}

fn print_worker(worker: &Worker) {
    println!(
        "{}  {:<8} {:<16} issue={:<6} branch={:<24} pr={}",
        worker.id,
        worker.kind,
        worker.status,
        worker.issue_number.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
        worker.branch.clone().unwrap_or_else(|| "-".to_string()),
        worker.pr_url.clone().unwrap_or_else(|| "-".to_string()),
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = SwarmConfig::from_env();
    let engine = orchestrator::build_engine(&config)?;

    match cli.command {
        Command::Launch {
            kind,
            prompt,
            issue,
            base_branch,
        } => {
            let kind = WorkerKind::from_str(&kind).map_err(|e| anyhow::anyhow!(e))?;
            if kind == WorkerKind::Review {
                anyhow::bail!("review workers are spawned via request_review, not launched directly");
            }
            let worker = engine
                .launch(LaunchRequest {
                    kind,
                    prompt,
                    issue,
                    base_branch,
                })
                .map_err(|e| anyhow::anyhow!(e.to_structured().to_string()))?;
            print_worker(&worker);
        }
        Command::List {
            kind,
            status,
            parent,
            limit,
            offset,
        } => {
            let mut filter = WorkerFilter {
                limit: Some(limit),
                offset: Some(offset),
                order_by: OrderBy::CreatedAt,
                direction: Direction::Desc,
                ..Default::default()
            };
            if let Some(kind) = kind {
                filter.kinds = vec![WorkerKind::from_str(&kind).map_err(|e| anyhow::anyhow!(e))?];
            }
            if let Some(status) = status {
                filter.statuses = vec![WorkerStatus::from_str(&status).map_err(|e| anyhow::anyhow!(e))?];
            }
            filter.parent_id = parent;

            let workers = engine.store().list_workers(filter).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            for worker in &workers {
                print_worker(worker);
            }
        }
        Command::Show { id } => {
            let worker = engine
                .store()
                .get_worker(&id)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?
                .ok_or_else(|| anyhow::anyhow!("worker not found: {id}"))?;
            println!("{}", serde_json::to_string_pretty(&worker)?);
            let relationships = engine
                .store()
                .get_relationships(&id)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if !relationships.is_empty() {
                println!("relationships:");
                for rel in relationships {
                    println!(
                        "  {} -> {} kind={} iteration={}",
                        rel.parent_id, rel.child_id, rel.kind, rel.iteration
                    );
                }
            }
        }
        Command::Terminate { id } => {
            engine.cleanup(&id, false);
            println!("terminated {id}");
        }
        Command::CreatePr { id, title, body, draft } => {
            let worker = engine
                .create_pull_request(&id, PullRequestRequest { title, body, draft })
                .map_err(|e| anyhow::anyhow!(e.to_structured().to_string()))?;
            print_worker(&worker);
        }
        Command::SpawnReview { parent_id, review_prompt } => {
            let issue = engine
                .store()
                .get_worker(&parent_id)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?
                .ok_or_else(|| anyhow::anyhow!("worker not found: {parent_id}"))?
                .issue_number;
            let review = engine
                .spawn_review(orchestrator::tool_dispatch::spawn_review_request(parent_id, review_prompt, issue))
                .map_err(|e| anyhow::anyhow!(e.to_structured().to_string()))?;
            print_worker(&review);
        }
    }

    Ok(())
}
