//! Subprocess lifecycle for the per-worker tool-server and the LM CLI it
//! talks to. Spawn/terminate follows the same blocking `std::process::Child`
//! idiom the teacher uses for its agent subprocesses; termination escalates
//! from signal to hard-kill after a bounded timeout, mirroring
//! `TermDriver::kill_session`'s graceful-then-force shape.

use crate::error::AgentError;
use crate::store::WorkerKind;
use crate::term::TermDriver;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const ENV_NAME_RE_CHARS_FIRST: fn(char) -> bool = |c| c.is_ascii_alphabetic() || c == '_';
const ENV_NAME_RE_CHARS_REST: fn(char) -> bool = |c| c.is_ascii_alphanumeric() || c == '_';

#[derive(Debug, Clone)]
pub struct StartToolServerRequest {
    pub worker_id: String,
    pub kind: WorkerKind,
    pub workspace: String,
    pub branch: String,
    pub session: String,
    pub issue: Option<i64>,
    pub parent_id: Option<String>,
    pub parent_session: Option<String>,
    /// Path to the per-kind tool-server binary.
    pub binary: String,
}

#[derive(Debug, Clone)]
pub struct StartLmRequest {
    pub workspace: String,
    pub session: String,
    pub env: Vec<(String, String)>,
    pub binary: String,
}

pub struct ToolServerHandle {
    pub pid: i64,
    child: Child,
}

impl ToolServerHandle {
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

pub struct AgentDriver {
    term: TermDriver,
    kill_timeout: Duration,
}

impl AgentDriver {
    pub fn new(term: TermDriver, kill_timeout: Duration) -> Self {
        Self { term, kill_timeout }
    }

    fn lm_binary_available(&self, binary: &str) -> bool {
        which(binary).is_some()
    }

    fn validate_env(env: &[(String, String)]) -> Result<(), AgentError> {
        for (key, value) in env {
            let key_ok = key
                .chars()
                .next()
                .map(ENV_NAME_RE_CHARS_FIRST)
                .unwrap_or(false)
                && key.chars().skip(1).all(ENV_NAME_RE_CHARS_REST);
            if !key_ok || crate::shell_safety::validate_strict(value).is_err() {
                return Err(AgentError::LmLaunchFailed {
                    message: format!("invalid environment variable: {key}"),
                });
            }
        }
        Ok(())
    }

    pub fn start_tool_server(&self, req: StartToolServerRequest) -> Result<ToolServerHandle, AgentError> {
        let mut command = Command::new(&req.binary);
        command
            .arg("--agent-id")
            .arg(&req.worker_id)
            .arg("--kind")
            .arg(req.kind.to_string())
            .arg("--workspace")
            .arg(&req.workspace)
            .arg("--branch")
            .arg(&req.branch)
            .arg("--session")
            .arg(&req.session);

        if let Some(issue) = req.issue {
            command.arg("--issue").arg(issue.to_string());
        }
        if req.kind == WorkerKind::Review {
            if let Some(parent_id) = &req.parent_id {
                command.arg("--parent-instance-id").arg(parent_id);
            }
            if let Some(parent_session) = &req.parent_session {
                command.arg("--parent-tmux-session").arg(parent_session);
            }
        }

        let child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::ToolServerLaunchFailed { message: e.to_string() })?;

        let pid = child.id() as i64;
        Ok(ToolServerHandle { pid, child })
    }

    pub fn start_lm(&self, req: StartLmRequest) -> Result<i64, AgentError> {
        Self::validate_env(&req.env)?;
        if !self.lm_binary_available(&req.binary) {
            return Err(AgentError::LmNotFound);
        }

        let composed: String = req
            .env
            .iter()
            .map(|(k, v)| format!("export {k}={v}; "))
            .collect::<Vec<_>>()
            .join("")
            + &req.binary;

        self.term
            .send_keys(&req.session, &composed, true)
            .map_err(|e| AgentError::LmLaunchFailed { message: e.to_string() })?;

        // The LM runs inside the terminal session rather than as a
        // directly-owned child; the PID is not observable from here, so a
        // sentinel handle is returned and liveness is tracked through the
        // session instead.
        let _ = &req.workspace;
        Ok(0)
    }

    pub fn terminate_tool_server(&self, mut handle: ToolServerHandle) -> Result<(), AgentError> {
        let deadline = Instant::now() + self.kill_timeout;
        let _ = handle.child.kill();
        while Instant::now() < deadline {
            if handle.has_exited() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let _ = handle.child.kill();
        let _ = handle.child.wait();
        Ok(())
    }

    /// Terminate a subprocess by PID alone, the shape the cleanup protocol
    /// needs: by the time cleanup runs, the `ToolServerHandle`'s owning
    /// `Child` has long since been `mem::forget`-ed (its stdio pipes must
    /// stay open for the MCP server's lifetime), so the PID in the Store
    /// row is the only surviving handle. Sends SIGTERM, polls for exit up
    /// to `kill_timeout`, then SIGKILL — the same graceful-then-force shape
    /// as `TermDriver::kill_session`.
    pub fn terminate_pid(&self, pid: i64) -> Result<(), AgentError> {
        if pid <= 0 {
            return Ok(());
        }
        let _ = Command::new("kill").args(["-TERM", &pid.to_string()]).output();
        let deadline = Instant::now() + self.kill_timeout;
        while Instant::now() < deadline {
            let alive = Command::new("kill")
                .args(["-0", &pid.to_string()])
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);
            if !alive {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let _ = Command::new("kill").args(["-KILL", &pid.to_string()]).output();
        Ok(())
    }

    pub fn terminate_lm(&self, session: &str) -> Result<(), AgentError> {
        // The LM has no independently owned handle (see `start_lm`); its
        // lifetime is bound to the terminal session, so termination is a
        // no-op here and is completed by `TermDriver::kill_session`.
        let _ = session;
        Ok(())
    }
}

/// Resolve `binary` against `PATH`, the way a shell would.
fn which(binary: &str) -> Option<std::path::PathBuf> {
    if binary.contains('/') {
        let path = std::path::PathBuf::from(binary);
        return path.is_file().then_some(path);
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths).find_map(|dir| {
            let candidate = dir.join(binary);
            candidate.is_file().then_some(candidate)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_finds_a_known_binary() {
        assert!(which("sh").is_some() || which("/bin/sh").is_some());
    }

    #[test]
    fn which_rejects_unknown_binary() {
        assert!(which("definitely-not-a-real-binary-xyz").is_none());
    }

    #[test]
    fn terminate_pid_kills_a_real_process() {
        let driver = AgentDriver::new(TermDriver::default(), Duration::from_secs(5));
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i64;
        std::mem::forget(child);

        driver.terminate_pid(pid).unwrap();

        let alive = Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        assert!(!alive, "process {pid} should have been terminated");
    }

    #[test]
    fn terminate_pid_is_a_noop_for_zero_or_negative() {
        let driver = AgentDriver::new(TermDriver::default(), Duration::from_secs(5));
        assert!(driver.terminate_pid(0).is_ok());
        assert!(driver.terminate_pid(-1).is_ok());
    }

    #[test]
    fn validate_env_rejects_bad_keys_and_injection_values() {
        assert!(AgentDriver::validate_env(&[("GOOD_KEY".into(), "value".into())]).is_ok());
        assert!(AgentDriver::validate_env(&[("1BAD".into(), "value".into())]).is_err());
        assert!(AgentDriver::validate_env(&[("KEY".into(), "$(evil)".into())]).is_err());
    }
}
