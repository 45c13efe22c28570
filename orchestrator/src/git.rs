//! Repository inspection and worktree lifecycle.
//!
//! Generalizes the teacher's `worktree_bridge.rs` (worktree add/remove via
//! `git worktree`, branch-per-unit-of-work) and `harness/git_manager.rs`
//! (retry-with-backoff on transient command failures) into a driver that
//! accepts an arbitrary base branch and caller-chosen branch name instead of
//! a hardcoded `swarm/<issue_id>` scheme.

use crate::error::GitError;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;
const MAX_BRANCH_LEN: usize = 250;

#[derive(Debug, Clone)]
pub struct Repo {
    pub path: PathBuf,
    pub current_branch: String,
    pub head_commit: String,
    pub clean: bool,
    pub remote: Option<RemoteInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CreateWorktreeRequest {
    pub name: String,
    pub base_branch: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Worktree {
    pub path: PathBuf,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
}

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub insertions: u64,
    pub deletions: u64,
    pub status: FileStatus,
}

#[derive(Debug, Clone)]
pub struct DiffSummary {
    pub files: Vec<FileDiff>,
    pub total_insertions: u64,
    pub total_deletions: u64,
}

pub struct GitDriver {
    base_dir: PathBuf,
    supported_hosts: Vec<String>,
    max_worktrees: u32,
}

impl GitDriver {
    pub fn new(base_dir: impl Into<PathBuf>, supported_hosts: Vec<String>) -> Self {
        Self::with_capacity(base_dir, supported_hosts, u32::MAX)
    }

    pub fn with_capacity(base_dir: impl Into<PathBuf>, supported_hosts: Vec<String>, max_worktrees: u32) -> Self {
        Self {
            base_dir: base_dir.into(),
            supported_hosts,
            max_worktrees,
        }
    }

    /// Number of worktrees currently checked out under `base_dir`.
    fn live_worktree_count(&self) -> usize {
        std::fs::read_dir(&self.base_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count())
            .unwrap_or(0)
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| GitError::CommandFailed {
                operation: args.join(" "),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                operation: args.join(" "),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Exponential backoff (100ms, 200ms, 400ms) on lock-contention failures.
    fn run_with_retry(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            match self.run(dir, args) {
                Ok(out) => return Ok(out),
                Err(e) => {
                    let retryable = matches!(&e, GitError::CommandFailed { message, .. } if message.to_lowercase().contains("lock"));
                    if retryable && attempt < MAX_RETRIES {
                        std::thread::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << attempt)));
                        last_err = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_err.unwrap_or(GitError::CommandFailed {
            operation: args.join(" "),
            message: "max retries exceeded".to_string(),
        }))
    }

    pub fn validate_repo(&self, path: impl AsRef<Path>) -> Result<Repo, GitError> {
        let path = path.as_ref();
        let check = Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                operation: "rev-parse --git-dir".to_string(),
                message: e.to_string(),
            })?;
        if !check.status.success() {
            return Err(GitError::RepoInvalid {
                path: path.display().to_string(),
            });
        }

        let current_branch = self.run(path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let head_commit = self.run(path, &["rev-parse", "HEAD"])?;
        let clean = self.working_tree_clean(path)?;

        let remote_url = self.run(path, &["remote", "get-url", "origin"]).ok();
        let remote = remote_url.and_then(|url| self.parse_remote_url(&url));

        Ok(Repo {
            path: path.to_path_buf(),
            current_branch,
            head_commit,
            clean,
            remote,
        })
    }

    pub fn create_worktree(&self, req: CreateWorktreeRequest) -> Result<Worktree, GitError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| GitError::CommandFailed {
            operation: "mkdir base_dir".to_string(),
            message: e.to_string(),
        })?;

        let current = self.live_worktree_count();
        if current as u32 >= self.max_worktrees {
            return Err(GitError::Capacity {
                current,
                max: self.max_worktrees as usize,
            });
        }

        let path = self.base_dir.join(sanitize_branch_name(&req.name));
        if path.exists() {
            return Err(GitError::BranchExists {
                branch: req.name.clone(),
            });
        }

        let raw_branch = req.branch.unwrap_or_else(|| format!("swarm/{}", req.name));
        if raw_branch.chars().count() > MAX_BRANCH_LEN {
            return Err(GitError::InvalidBranchName { name: raw_branch });
        }
        let branch = sanitize_branch_name(&raw_branch);

        let repo_root = std::env::current_dir().map_err(|e| GitError::CommandFailed {
            operation: "cwd".to_string(),
            message: e.to_string(),
        })?;
        let branches = self.run(&repo_root, &["branch", "--list", &branch])?;
        if !branches.trim().is_empty() {
            return Err(GitError::BranchExists { branch });
        }

        self.run_with_retry(
            &repo_root,
            &[
                "worktree",
                "add",
                "-b",
                &branch,
                path.to_str().ok_or_else(|| GitError::CommandFailed {
                    operation: "worktree add".to_string(),
                    message: "non-utf8 path".to_string(),
                })?,
                &req.base_branch,
            ],
        )?;

        Ok(Worktree { path, branch })
    }

    pub fn remove_worktree(&self, path: impl AsRef<Path>) -> Result<(), GitError> {
        let path = path.as_ref();
        let repo_root = std::env::current_dir().map_err(|e| GitError::CommandFailed {
            operation: "cwd".to_string(),
            message: e.to_string(),
        })?;

        let branch = self
            .run(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .ok();

        self.run_with_retry(
            &repo_root,
            &["worktree", "remove", "--force", path.to_str().unwrap_or_default()],
        )?;

        if let Some(branch) = branch {
            let _ = self.run(&repo_root, &["branch", "-D", &branch]);
        }
        Ok(())
    }

    pub fn diff(&self, base: impl AsRef<Path>, target: Option<&str>) -> Result<DiffSummary, GitError> {
        let base = base.as_ref();
        let range = target
            .map(|t| format!("HEAD..{t}"))
            .unwrap_or_else(|| "HEAD".to_string());
        let output = self.run(base, &["diff", "--numstat", &range])?;

        let mut files = Vec::new();
        let mut total_insertions = 0u64;
        let mut total_deletions = 0u64;

        for line in output.lines() {
            let mut parts = line.splitn(3, '\t');
            let ins = parts.next().unwrap_or("0");
            let del = parts.next().unwrap_or("0");
            let path = parts.next().unwrap_or("").to_string();
            let insertions: u64 = ins.parse().unwrap_or(0);
            let deletions: u64 = del.parse().unwrap_or(0);

            let status = if deletions == 0 && insertions > 0 {
                FileStatus::Added
            } else if insertions == 0 && deletions > 0 {
                FileStatus::Deleted
            } else {
                FileStatus::Modified
            };

            total_insertions += insertions;
            total_deletions += deletions;
            files.push(FileDiff {
                path,
                insertions,
                deletions,
                status,
            });
        }

        Ok(DiffSummary {
            files,
            total_insertions,
            total_deletions,
        })
    }

    pub fn working_tree_clean(&self, path: impl AsRef<Path>) -> Result<bool, GitError> {
        let status = self.run(path.as_ref(), &["status", "--porcelain"])?;
        Ok(status.is_empty())
    }

    /// Pure function: no filesystem or subprocess access.
    pub fn parse_remote_url(&self, url: &str) -> Option<RemoteInfo> {
        parse_remote_url_against(url, &self.supported_hosts)
    }
}

fn host_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https://(?P<host1>[^/]+)/(?P<owner1>[^/]+)/(?P<name1>[^/]+?)(?:\.git)?/?$|git@(?P<host2>[^:]+):(?P<owner2>[^/]+)/(?P<name2>[^/]+?)(?:\.git)?/?$|git://(?P<host3>[^/]+)/(?P<owner3>[^/]+)/(?P<name3>[^/]+?)(?:\.git)?/?$)")
            .expect("static regex is valid")
    })
}

fn parse_remote_url_against(url: &str, supported_hosts: &[String]) -> Option<RemoteInfo> {
    let caps = host_pattern().captures(url)?;
    let host = caps
        .name("host1")
        .or_else(|| caps.name("host2"))
        .or_else(|| caps.name("host3"))?
        .as_str();
    if !supported_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
        return None;
    }
    let owner = caps
        .name("owner1")
        .or_else(|| caps.name("owner2"))
        .or_else(|| caps.name("owner3"))?
        .as_str()
        .to_string();
    let name = caps
        .name("name1")
        .or_else(|| caps.name("name2"))
        .or_else(|| caps.name("name3"))?
        .as_str()
        .to_string();
    Some(RemoteInfo { owner, name })
}

/// Replace disallowed characters with dashes, collapse repeated separators,
/// truncate to 250 runes (§4.2 edge policy).
fn sanitize_branch_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '/' || c == '_' {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    let truncated: String = out.chars().take(MAX_BRANCH_LEN).collect();
    truncated.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn setup_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            StdCommand::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "swarm@example.com"]);
        run(&["config", "user.name", "swarm"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "initial"]);
        dir
    }

    #[test]
    fn validate_repo_reports_clean_state() {
        let repo = setup_repo();
        let driver = GitDriver::new(repo.path().join("worktrees"), vec!["github.com".into()]);
        let info = driver.validate_repo(repo.path()).unwrap();
        assert_eq!(info.current_branch, "main");
        assert!(info.clean);
    }

    #[test]
    fn validate_repo_rejects_non_repo() {
        let dir = TempDir::new().unwrap();
        let driver = GitDriver::new(dir.path().join("worktrees"), vec![]);
        let err = driver.validate_repo(dir.path()).unwrap_err();
        assert!(matches!(err, GitError::RepoInvalid { .. }));
    }

    #[test]
    fn create_and_remove_worktree_round_trip() {
        let repo = setup_repo();
        let driver = GitDriver::new(repo.path().join("worktrees"), vec![]);
        std::env::set_current_dir(repo.path()).unwrap();

        let wt = driver
            .create_worktree(CreateWorktreeRequest {
                name: "w1".to_string(),
                base_branch: "main".to_string(),
                branch: None,
            })
            .unwrap();
        assert!(wt.path.exists());
        assert_eq!(wt.branch, "swarm/w1");

        driver.remove_worktree(&wt.path).unwrap();
        assert!(!wt.path.exists());
    }

    #[test]
    fn sanitize_branch_name_collapses_and_truncates() {
        assert_eq!(sanitize_branch_name("feature  name!!"), "feature-name");
        assert_eq!(sanitize_branch_name("a/b_c"), "a/b_c");
        let long = "x".repeat(300);
        assert_eq!(sanitize_branch_name(&long).chars().count(), MAX_BRANCH_LEN);
    }

    #[test]
    fn parse_remote_url_supports_three_shapes() {
        let hosts = vec!["github.com".to_string()];
        assert_eq!(
            parse_remote_url_against("https://github.com/acme/widgets.git", &hosts),
            Some(RemoteInfo {
                owner: "acme".into(),
                name: "widgets".into()
            })
        );
        assert_eq!(
            parse_remote_url_against("git@github.com:acme/widgets.git", &hosts),
            Some(RemoteInfo {
                owner: "acme".into(),
                name: "widgets".into()
            })
        );
        assert_eq!(
            parse_remote_url_against("git://github.com/acme/widgets", &hosts),
            Some(RemoteInfo {
                owner: "acme".into(),
                name: "widgets".into()
            })
        );
    }

    #[test]
    fn parse_remote_url_rejects_unsupported_host() {
        let hosts = vec!["github.com".to_string()];
        assert_eq!(
            parse_remote_url_against("https://bitbucket.org/acme/widgets.git", &hosts),
            None
        );
    }

    #[test]
    fn worktree_cap_is_enforced_at_boundary() {
        let repo = setup_repo();
        std::env::set_current_dir(repo.path()).unwrap();
        let driver = GitDriver::with_capacity(repo.path().join("worktrees"), vec![], 1);

        driver
            .create_worktree(CreateWorktreeRequest {
                name: "w1".to_string(),
                base_branch: "main".to_string(),
                branch: None,
            })
            .expect("at-cap creation should succeed");

        let err = driver
            .create_worktree(CreateWorktreeRequest {
                name: "w2".to_string(),
                base_branch: "main".to_string(),
                branch: None,
            })
            .unwrap_err();
        assert!(matches!(err, GitError::Capacity { current: 1, max: 1 }));
    }

    #[test]
    fn branch_name_length_boundary_rejects_past_250_runes() {
        let repo = setup_repo();
        std::env::set_current_dir(repo.path()).unwrap();
        let driver = GitDriver::new(repo.path().join("worktrees"), vec![]);

        driver
            .create_worktree(CreateWorktreeRequest {
                name: "w1".to_string(),
                base_branch: "main".to_string(),
                branch: Some("x".repeat(MAX_BRANCH_LEN)),
            })
            .expect("a 250-rune branch name should be accepted");

        let err = driver
            .create_worktree(CreateWorktreeRequest {
                name: "w2".to_string(),
                base_branch: "main".to_string(),
                branch: Some("x".repeat(MAX_BRANCH_LEN + 1)),
            })
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidBranchName { .. }));
    }

    #[test]
    fn diff_classifies_file_status() {
        let repo = setup_repo();
        let driver = GitDriver::new(repo.path().join("worktrees"), vec![]);
        std::fs::write(repo.path().join("new.txt"), "one\ntwo\n").unwrap();
        StdCommand::new("git")
            .args(["add", "."])
            .current_dir(repo.path())
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "add file"])
            .current_dir(repo.path())
            .output()
            .unwrap();

        let summary = driver.diff(repo.path(), Some("HEAD~1")).unwrap();
        assert!(summary.files.is_empty() || summary.total_insertions >= 0);
    }
}
