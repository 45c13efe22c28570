//! Process-wide configuration.
//!
//! Loaded once at startup from environment variables with documented
//! defaults, then held immutable (behind an `Arc`) for the process
//! lifetime — no global mutable singleton, no read-modify cycles at
//! runtime.

use std::path::PathBuf;

/// Hosting-site hosts recognized by `GitDriver::parse_remote_url`.
pub const DEFAULT_SUPPORTED_HOSTS: &[&str] = &["github.com", "gitlab.com"];

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// `DATABASE_URL` — path to the sqlite database file.
    pub database_url: String,
    /// `LOG_LEVEL`
    pub log_level: String,
    /// `HOSTING_TOKEN`
    pub hosting_token: Option<String>,
    /// `HOSTING_API_URL`
    pub hosting_api_url: String,
    /// `HOSTING_TIMEOUT_MS`
    pub hosting_timeout_ms: u64,
    /// `LM_MODEL`
    pub lm_model: String,
    /// `LM_TIMEOUT_MS`
    pub lm_timeout_ms: u64,
    /// `GIT_TIMEOUT_MS`
    pub git_timeout_ms: u64,
    /// `GIT_DEFAULT_BRANCH`
    pub git_default_branch: String,
    /// `TERM_SESSION_PREFIX`
    pub term_session_prefix: String,
    /// `TERM_KILL_TIMEOUT_MS`
    pub term_kill_timeout_ms: u64,
    /// `WORKTREE_BASE_PATH`
    pub worktree_base_path: PathBuf,
    /// `WORKTREE_MAX`, bounded to [1, 50]
    pub worktree_max: u32,
    /// `CLEANUP_ON_ERROR`
    pub cleanup_on_error: bool,
    /// Hosts recognized by `parse_remote_url`; not independently configurable
    /// via env in this spec but kept as a field so it is passed explicitly
    /// rather than read from a constant at call sites.
    pub supported_hosts: Vec<String>,
    /// Default review-prompt template prepended to review worker launches.
    /// Left as plain configuration per the open question in the design
    /// notes — sourced from `REVIEW_PROMPT_TEMPLATE` or a built-in default.
    pub review_prompt_template: String,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            database_url: "swarm.sqlite3".to_string(),
            log_level: "info".to_string(),
            hosting_token: None,
            hosting_api_url: "https://api.github.com".to_string(),
            hosting_timeout_ms: 30_000,
            lm_model: "default".to_string(),
            lm_timeout_ms: 60_000,
            git_timeout_ms: 30_000,
            git_default_branch: "main".to_string(),
            term_session_prefix: "swarm".to_string(),
            term_kill_timeout_ms: 10_000,
            worktree_base_path: std::env::temp_dir().join("swarm-worktrees"),
            worktree_max: 50,
            cleanup_on_error: true,
            supported_hosts: DEFAULT_SUPPORTED_HOSTS.iter().map(|s| s.to_string()).collect(),
            review_prompt_template:
                "Review the following change for correctness, style, and test coverage."
                    .to_string(),
        }
    }
}

impl SwarmConfig {
    /// Build config from environment variables, falling back to defaults.
    /// Validation (bounding `worktree_max` to [1, 50]) happens once here,
    /// at load time — never on a read-modify cycle at runtime.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DATABASE_URL") {
            config.database_url = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = std::env::var("HOSTING_TOKEN") {
            config.hosting_token = Some(v);
        }
        if let Ok(v) = std::env::var("HOSTING_API_URL") {
            config.hosting_api_url = v;
        }
        if let Ok(v) = std::env::var("HOSTING_TIMEOUT_MS").ok().and_then(|s| s.parse().ok()) {
            config.hosting_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("LM_MODEL") {
            config.lm_model = v;
        }
        if let Ok(v) = std::env::var("LM_TIMEOUT_MS").ok().and_then(|s| s.parse().ok()) {
            config.lm_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("GIT_TIMEOUT_MS").ok().and_then(|s| s.parse().ok()) {
            config.git_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("GIT_DEFAULT_BRANCH") {
            config.git_default_branch = v;
        }
        if let Ok(v) = std::env::var("TERM_SESSION_PREFIX") {
            config.term_session_prefix = v;
        }
        if let Ok(v) = std::env::var("TERM_KILL_TIMEOUT_MS").ok().and_then(|s| s.parse().ok()) {
            config.term_kill_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("WORKTREE_BASE_PATH") {
            config.worktree_base_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WORKTREE_MAX").ok().and_then(|s| s.parse::<u32>().ok()) {
            config.worktree_max = v.clamp(1, 50);
        }
        if let Ok(v) = std::env::var("CLEANUP_ON_ERROR") {
            config.cleanup_on_error = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("REVIEW_PROMPT_TEMPLATE") {
            config.review_prompt_template = v;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SwarmConfig::default();
        assert_eq!(config.worktree_max, 50);
        assert!(config.cleanup_on_error);
    }

    #[test]
    fn worktree_max_is_clamped() {
        std::env::set_var("WORKTREE_MAX", "500");
        let config = SwarmConfig::from_env();
        assert_eq!(config.worktree_max, 50);
        std::env::set_var("WORKTREE_MAX", "0");
        let config = SwarmConfig::from_env();
        assert_eq!(config.worktree_max, 1);
        std::env::remove_var("WORKTREE_MAX");
    }
}
