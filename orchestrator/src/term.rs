//! Named, persistent terminal-mux sessions.
//!
//! Shells out to the `tmux` binary directly via `std::process::Command`
//! (argv-only, never through a shell) rather than a pty library, because
//! the contract names literal tmux subcommands and a `-F` format string.
//! Grounded in the same subprocess-wrapping idiom as `git.rs` and the
//! teacher's `GitManager`, with name/path validation from `shell_safety`.

use crate::error::TermError;
use crate::shell_safety;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

const MAX_SESSION_NAME_LEN: usize = 100;
const POLL_INTERVAL_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub name: String,
    pub cwd: String,
    pub env: Vec<(String, String)>,
    pub initial_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KillSessionOptions {
    pub graceful_timeout_s: u64,
    pub force: bool,
}

impl Default for KillSessionOptions {
    fn default() -> Self {
        Self {
            graceful_timeout_s: 10,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub name: String,
    pub created_at: String,
    pub windows: u32,
    pub alive: bool,
}

pub struct TermDriver {
    binary: String,
}

impl Default for TermDriver {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TermDriver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn run(&self, args: &[&str]) -> std::io::Result<std::process::Output> {
        Command::new(&self.binary).args(args).output()
    }

    fn validate_name(name: &str) -> Result<(), TermError> {
        let ok = !name.is_empty()
            && name.chars().count() <= MAX_SESSION_NAME_LEN
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !ok {
            return Err(TermError::InvalidName { name: name.to_string() });
        }
        Ok(())
    }

    fn validate_cwd(cwd: &str) -> Result<(), TermError> {
        let path = Path::new(cwd);
        if !path.is_absolute() || cwd.split('/').any(|seg| seg == "..") {
            return Err(TermError::InvalidDirectory { path: cwd.to_string() });
        }
        Ok(())
    }

    fn validate_env(env: &[(String, String)]) -> Result<(), TermError> {
        for (key, value) in env {
            if shell_safety::validate_strict(key).is_err() || shell_safety::validate_strict(value).is_err() {
                return Err(TermError::InvalidName { name: key.clone() });
            }
        }
        Ok(())
    }

    fn has_session(&self, name: &str) -> Result<bool, TermError> {
        let output = self
            .run(&["has-session", "-t", name])
            .map_err(|_| TermError::NotAvailable)?;
        Ok(output.status.success())
    }

    pub fn create_session(&self, req: CreateSessionRequest) -> Result<String, TermError> {
        Self::validate_name(&req.name)?;
        Self::validate_cwd(&req.cwd)?;
        Self::validate_env(&req.env)?;

        if self.has_session(&req.name)? {
            return Err(TermError::SessionExists { name: req.name });
        }

        let env_pairs: Vec<String> = req.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut args_owned: Vec<String> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            req.name.clone(),
            "-c".into(),
            req.cwd.clone(),
        ];
        for pair in &env_pairs {
            args_owned.push("-e".into());
            args_owned.push(pair.clone());
        }
        let args_ref: Vec<&str> = args_owned.iter().map(|s| s.as_str()).collect();

        let output = self.run(&args_ref).map_err(|_| TermError::NotAvailable)?;
        if !output.status.success() {
            return Err(TermError::SessionExists { name: req.name });
        }

        if let Some(cmd) = req.initial_command {
            self.send_keys(&req.name, &cmd, true)?;
        }

        Ok(req.name)
    }

    pub fn kill_session(&self, name: &str, opts: KillSessionOptions) -> Result<(), TermError> {
        Self::validate_name(name)?;
        if !self.has_session(name)? {
            return Err(TermError::SessionNotFound { name: name.to_string() });
        }

        if !opts.force {
            let _ = self.send_keys(name, "exit", true);
            let deadline = Instant::now() + Duration::from_secs(opts.graceful_timeout_s);
            while Instant::now() < deadline {
                if !self.has_session(name).unwrap_or(false) {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
        }

        let output = self.run(&["kill-session", "-t", name]).map_err(|_| TermError::NotAvailable)?;
        if !output.status.success() && self.has_session(name).unwrap_or(false) {
            return Err(TermError::SessionNotFound { name: name.to_string() });
        }
        Ok(())
    }

    /// Strictly ordered per session: the caller is expected to serialize
    /// calls for a single `name` (engine-level guarantee, not enforced here).
    pub fn send_keys(&self, name: &str, text: &str, press_enter: bool) -> Result<(), TermError> {
        Self::validate_name(name)?;
        if !self.has_session(name)? {
            return Err(TermError::SessionNotFound { name: name.to_string() });
        }

        for line in text.split('\n') {
            let output = self
                .run(&["send-keys", "-t", name, "-l", "--", line])
                .map_err(|_| TermError::NotAvailable)?;
            if !output.status.success() {
                return Err(TermError::SessionNotFound { name: name.to_string() });
            }
            if press_enter {
                let enter = self.run(&["send-keys", "-t", name, "Enter"]).map_err(|_| TermError::NotAvailable)?;
                if !enter.status.success() {
                    return Err(TermError::SessionNotFound { name: name.to_string() });
                }
            }
        }
        Ok(())
    }

    pub fn list_sessions(&self, glob_pattern: Option<&str>) -> Result<Vec<SessionInfo>, TermError> {
        let output = self
            .run(&["list-sessions", "-F", "#{session_name}:#{session_created}:#{session_windows}:#{session_id}"])
            .map_err(|_| TermError::NotAvailable)?;

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut sessions = Vec::new();
        for line in stdout.lines() {
            let mut parts = line.splitn(4, ':');
            let name = parts.next().unwrap_or("").to_string();
            let created_at = parts.next().unwrap_or("").to_string();
            let windows: u32 = parts.next().and_then(|w| w.parse().ok()).unwrap_or(0);

            if let Some(pattern) = glob_pattern {
                if !glob_match(pattern, &name) {
                    continue;
                }
            }

            sessions.push(SessionInfo {
                name,
                created_at,
                windows,
                alive: true,
            });
        }
        Ok(sessions)
    }

    pub fn get_session_info(&self, name: &str) -> Result<SessionInfo, TermError> {
        Self::validate_name(name)?;
        let sessions = self.list_sessions(None)?;
        sessions
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| TermError::SessionNotFound { name: name.to_string() })
    }
}

/// Minimal glob: `*` matches any run of characters, everything else literal.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_oversize_and_bad_chars() {
        assert!(TermDriver::validate_name(&"a".repeat(100)).is_ok());
        assert!(matches!(
            TermDriver::validate_name(&"a".repeat(101)),
            Err(TermError::InvalidName { .. })
        ));
        assert!(matches!(
            TermDriver::validate_name("bad name"),
            Err(TermError::InvalidName { .. })
        ));
        assert!(matches!(
            TermDriver::validate_name("bad;name"),
            Err(TermError::InvalidName { .. })
        ));
    }

    #[test]
    fn validate_cwd_rejects_relative_and_traversal() {
        assert!(TermDriver::validate_cwd("/abs/path").is_ok());
        assert!(matches!(
            TermDriver::validate_cwd("relative/path"),
            Err(TermError::InvalidDirectory { .. })
        ));
        assert!(matches!(
            TermDriver::validate_cwd("/abs/../etc"),
            Err(TermError::InvalidDirectory { .. })
        ));
    }

    #[test]
    fn glob_match_supports_star() {
        assert!(glob_match("worker-*", "worker-123"));
        assert!(!glob_match("worker-*", "other-123"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "other"));
    }
}
