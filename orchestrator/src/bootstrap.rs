//! Shared engine construction for both binaries (`swarmctl` and the
//! tool-server subprocess): each opens the same durable SQLite store and
//! wires the same real drivers from `SwarmConfig`, rather than duplicating
//! the wiring per binary.

use crate::config::SwarmConfig;
use crate::workflow::{Drivers, GithubHostingSite, HostingSite, UnconfiguredHostingSite, WorkflowEngine};
use std::time::Duration;

fn build_hosting_site(config: &SwarmConfig, git: &crate::git::GitDriver) -> Box<dyn HostingSite> {
    let Some(token) = config.hosting_token.clone() else {
        return Box::new(UnconfiguredHostingSite);
    };
    let Ok(cwd) = std::env::current_dir() else {
        return Box::new(UnconfiguredHostingSite);
    };
    let Ok(repo) = git.validate_repo(&cwd) else {
        return Box::new(UnconfiguredHostingSite);
    };
    let Some(remote) = repo.remote else {
        return Box::new(UnconfiguredHostingSite);
    };

    match GithubHostingSite::new(
        config.hosting_api_url.clone(),
        token,
        remote.owner,
        remote.name,
        Duration::from_millis(config.hosting_timeout_ms),
    ) {
        Ok(site) => Box::new(site),
        Err(e) => {
            tracing::warn!("failed to build hosting-site client: {e}, falling back to unconfigured");
            Box::new(UnconfiguredHostingSite)
        }
    }
}

/// Build a `WorkflowEngine` against the store and drivers named by `config`,
/// the way both `swarmctl` and the tool-server binary need to at startup.
pub fn build_engine(config: &SwarmConfig) -> anyhow::Result<WorkflowEngine> {
    let store = crate::store::Store::open(&config.database_url)?;
    let git = crate::git::GitDriver::with_capacity(
        config.worktree_base_path.clone(),
        config.supported_hosts.clone(),
        config.worktree_max,
    );
    let hosting = build_hosting_site(config, &git);
    let term = crate::term::TermDriver::default();
    let agent = crate::agent::AgentDriver::new(crate::term::TermDriver::default(), Duration::from_millis(config.term_kill_timeout_ms));

    let tool_server_binary = std::env::var("TOOL_SERVER_BIN").unwrap_or_else(|_| "tool-server".to_string());

    let drivers = Drivers {
        store,
        git,
        term,
        agent,
        lm_binary: std::env::var("LM_CLI_BIN").unwrap_or_else(|_| "lm".to_string()),
        tool_server_binary_coding: tool_server_binary.clone(),
        tool_server_binary_review: tool_server_binary.clone(),
        tool_server_binary_planning: tool_server_binary,
        review_prompt_template: config.review_prompt_template.clone(),
    };

    Ok(WorkflowEngine::new(drivers, hosting))
}
