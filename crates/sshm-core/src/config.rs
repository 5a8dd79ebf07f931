// ABOUTME: Manager configuration loading for ssh-manager
// ABOUTME: Parses config.json and resolves repo, ssh dir and log paths against the data root

use crate::error::{Result, SshmError};
use crate::paths::DataRoot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Raw manager descriptor as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfigFile {
    /// Git URL of the key repository
    pub ssh_key_remote_repo: String,
    /// Where the key repository is cloned locally
    pub ssh_key_local_repo: String,
    /// Target SSH directory (usually ~/.ssh)
    pub ssh_dir: String,
    /// Destination SSH config file, defaults to `<ssh_dir>/config`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<String>,
    /// Directory for daily log files, defaults to `<data_root>/logs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

/// Manager configuration with every path resolved.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub config_path: PathBuf,
    pub remote_repo: String,
    pub local_repo: PathBuf,
    pub ssh_dir: PathBuf,
    pub ssh_config: PathBuf,
    pub log_dir: PathBuf,
}

impl ManagerConfig {
    /// Load the config from its default location under the data root.
    pub fn load(root: &DataRoot) -> Result<Self> {
        Self::load_from(root.config_path(), root)
    }

    /// Load config from a specific path.
    pub fn load_from(path: impl AsRef<Path>, root: &DataRoot) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SshmError::io(path, e))?;
        Self::parse(&content, path, root)
    }

    /// Parse config text; `path` is used for error reporting and as the base
    /// for relative paths.
    pub fn parse(content: &str, path: &Path, root: &DataRoot) -> Result<Self> {
        let raw: ManagerConfigFile =
            serde_json::from_str(content).map_err(|e| SshmError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if raw.ssh_key_local_repo.trim().is_empty() || raw.ssh_dir.trim().is_empty() {
            return Err(SshmError::ConfigParse {
                path: path.to_path_buf(),
                message: "ssh_key_local_repo and ssh_dir must not be empty".to_string(),
            });
        }

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let ssh_dir = root.resolve(raw.ssh_dir.trim(), base);
        let ssh_config = match raw.ssh_config.as_deref() {
            Some(value) => root.resolve(value.trim(), base),
            None => ssh_dir.join("config"),
        };
        let log_dir = match raw.log_dir.as_deref() {
            Some(value) => root.resolve(value.trim(), base),
            None => root.log_dir(),
        };

        Ok(Self {
            config_path: path.to_path_buf(),
            remote_repo: root.expand(raw.ssh_key_remote_repo.trim()),
            local_repo: root.resolve(raw.ssh_key_local_repo.trim(), base),
            ssh_dir,
            ssh_config,
            log_dir,
        })
    }

    /// The key repository's own descriptor, `<local_repo>/config.json`.
    pub fn repo_config_path(&self) -> PathBuf {
        self.local_repo.join("config.json")
    }
}
