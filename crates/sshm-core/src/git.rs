// ABOUTME: Local checkout of the key repository: clone or pull via the git CLI.
// ABOUTME: Also loads and validates the repository's config.json.

use crate::config::ManagerConfig;
use crate::error::{Result, SshmError};
use crate::repo::{CheckReport, RepoConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SSH_COMMAND: &str = "ssh -o StrictHostKeyChecking=accept-new -o BatchMode=yes";

/// The key repository's remote URL and local checkout.
#[derive(Debug, Clone)]
pub struct KeyRepo {
    remote_url: String,
    local_path: PathBuf,
}

impl KeyRepo {
    pub fn new(remote_url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            remote_url: remote_url.into(),
            local_path: local_path.into(),
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(config.remote_repo.clone(), config.local_repo.clone())
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Clone the repository if needed, confirm its origin, then pull.
    pub fn pull(&self) -> Result<()> {
        if !self.local_path.exists() {
            self.clone_fresh()?;
        } else if !self.local_path.join(".git").exists() {
            let empty_dir = self.local_path.is_dir()
                && fs::read_dir(&self.local_path)
                    .map_err(|e| SshmError::io(&self.local_path, e))?
                    .next()
                    .is_none();
            if !empty_dir {
                return Err(SshmError::Git {
                    command: "clone".to_string(),
                    message: format!(
                        "{} exists but is not a git repository",
                        self.local_path.display()
                    ),
                });
            }
            fs::remove_dir(&self.local_path).map_err(|e| SshmError::io(&self.local_path, e))?;
            self.clone_fresh()?;
        }

        let origin = self.git(&["remote", "get-url", "origin"], Some(&self.local_path))?;
        if origin != self.remote_url {
            return Err(SshmError::Git {
                command: "remote get-url origin".to_string(),
                message: format!(
                    "{} tracks {origin}, expected {}",
                    self.local_path.display(),
                    self.remote_url
                ),
            });
        }

        self.git(&["pull", "--ff-only"], Some(&self.local_path))?;
        tracing::info!(path = %self.local_path.display(), "key repository up to date");
        Ok(())
    }

    /// Parse `<local>/config.json`.
    pub fn load_config(&self) -> Result<RepoConfig> {
        RepoConfig::load(&self.local_path)
    }

    /// Parse the repository config and check every identity file.
    pub fn check(&self) -> Result<CheckReport> {
        let report = self.load_config()?.check();
        for problem in &report.problems {
            tracing::warn!("{problem}");
        }
        Ok(report)
    }

    fn clone_fresh(&self) -> Result<()> {
        if let Some(parent) = self.local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SshmError::io(parent, e))?;
        }
        let local = self.local_path.to_string_lossy().into_owned();
        tracing::info!(url = %self.remote_url, path = %local, "cloning key repository");
        self.git(&["clone", "--quiet", &self.remote_url, &local], None)?;
        Ok(())
    }

    /// Run git non-interactively and return trimmed stdout.
    fn git(&self, args: &[&str], dir: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        for (key, value) in git_env(&self.remote_url) {
            cmd.env(key, value);
        }

        let subcommand = args.first().copied().unwrap_or_default().to_string();
        tracing::debug!(args = ?args, "running git");
        let output = cmd.output().map_err(|e| SshmError::Git {
            command: subcommand.clone(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(SshmError::Git {
                command: subcommand,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Environment that keeps git from prompting.
fn git_env(remote_url: &str) -> Vec<(&'static str, &'static str)> {
    let mut env = vec![("GIT_TERMINAL_PROMPT", "0"), ("GIT_ASKPASS", "echo")];
    if remote_url.starts_with("git@") || remote_url.starts_with("ssh://") {
        env.push(("GIT_SSH_COMMAND", SSH_COMMAND));
    }
    env
}
