// ABOUTME: Data root discovery and path expansion helpers.
// ABOUTME: Resolves the directory holding config.json via env var or marker file search.

use crate::error::{Result, SshmError};
use std::path::{Path, PathBuf};

/// Environment variable that pins the data root explicitly.
pub const DATA_ROOT_ENV: &str = "SSH_MANAGER_DATA_ROOT";

/// Marker file whose presence identifies a data root directory.
pub const DATA_ROOT_MARKER: &str = "SSH_CONFIG_DATA_ROOT";

/// Placeholder replaced with the data root inside config values.
pub const DATA_ROOT_TOKEN: &str = "%{DATA_ROOT}";

/// The directory containing the manager's own configuration.
///
/// Discovered once at startup and passed explicitly to everything that needs
/// it, so tests can construct one pointing anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRoot {
    path: PathBuf,
}

impl DataRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locate the data root from the environment and the working directory.
    pub fn discover() -> Result<Self> {
        let env_root = std::env::var_os(DATA_ROOT_ENV).map(PathBuf::from);
        let cwd = std::env::current_dir().map_err(|e| SshmError::io(".", e))?;
        Self::discover_from(env_root, &cwd, dirs::home_dir().as_deref())
    }

    /// Discovery with every input supplied by the caller.
    ///
    /// Order: explicit env value, then `start` and each of its ancestors, then
    /// `home`. Each candidate matches if it holds the marker file itself or has
    /// a direct child directory that does.
    pub fn discover_from(
        env_root: Option<PathBuf>,
        start: &Path,
        home: Option<&Path>,
    ) -> Result<Self> {
        if let Some(root) = env_root.filter(|p| !p.as_os_str().is_empty()) {
            tracing::debug!(root = %root.display(), "data root from {DATA_ROOT_ENV}");
            return Ok(Self::new(root));
        }

        let candidates = start.ancestors().chain(home);
        for candidate in candidates {
            if let Some(found) = match_candidate(candidate) {
                tracing::debug!(root = %found.display(), "data root from marker file");
                return Ok(Self::new(found));
            }
        }

        Err(SshmError::DataRootNotFound {
            marker: DATA_ROOT_MARKER,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default manager config location, `<root>/config.json`.
    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.json")
    }

    /// Default log directory, `<root>/logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.path.join("logs")
    }

    /// Replace every `%{DATA_ROOT}` in `value` with this root.
    pub fn expand(&self, value: &str) -> String {
        if !value.contains(DATA_ROOT_TOKEN) {
            return value.to_string();
        }
        value.replace(DATA_ROOT_TOKEN, &self.path.to_string_lossy())
    }

    /// Expand placeholders and `~`, then anchor relative paths at `base`.
    pub fn resolve(&self, value: &str, base: &Path) -> PathBuf {
        let expanded = self.expand(value);
        let expanded = shellexpand::tilde(&expanded);
        let path = PathBuf::from(expanded.as_ref());
        if path.is_absolute() {
            path
        } else {
            base.join(path)
        }
    }
}

fn match_candidate(dir: &Path) -> Option<PathBuf> {
    if dir.join(DATA_ROOT_MARKER).is_file() {
        return Some(dir.to_path_buf());
    }

    // Unreadable directories are skipped rather than aborting the search.
    let entries = std::fs::read_dir(dir).ok()?;
    let mut children: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    children.sort();
    children
        .into_iter()
        .find(|child| child.join(DATA_ROOT_MARKER).is_file())
}
