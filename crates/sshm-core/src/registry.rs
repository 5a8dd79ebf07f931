// ABOUTME: In-memory registry of managed host entries keyed by alias.
// ABOUTME: Enforces alias uniqueness and resolves references against the key repository.

use crate::block::Segment;
use crate::error::{Result, SshmError};
use crate::repo::RepoConfig;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// One managed host: an alias bound to a remote config and its chosen endpoint/auth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostEntry {
    pub host_alias: String,
    pub remote_config_name: String,
    pub endpoint_id: Option<String>,
    pub auth_id: Option<String>,
    /// Where the private key was copied to; filled in at flush time.
    pub materialized_key_path: Option<PathBuf>,
}

/// Ordered set of host entries with unique aliases.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    entries: Vec<HostEntry>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry from the managed blocks of a parsed config file.
    ///
    /// The first block for an alias wins; later duplicates are ignored and
    /// disappear on the next flush.
    pub fn from_segments(segments: &[Segment]) -> Self {
        let mut registry = Self::new();
        for segment in segments {
            let Segment::Managed(block) = segment else {
                continue;
            };
            let header = &block.header;
            if registry.get(&header.alias).is_some() {
                tracing::warn!(host = %header.alias, "duplicate managed block ignored");
                continue;
            }
            registry.entries.push(HostEntry {
                host_alias: header.alias.clone(),
                remote_config_name: header.remote.clone(),
                endpoint_id: header.endpoint_id.clone(),
                auth_id: header.auth_id.clone(),
                materialized_key_path: block.identity_file().map(PathBuf::from),
            });
        }
        registry
    }

    /// Register a new alias.
    ///
    /// Omitted ids select the sole endpoint/auth of the remote config; with
    /// none available the entry simply has none, with several the call fails
    /// with [`SshmError::AmbiguousReference`]. The registry is unchanged on error.
    pub fn add(
        &mut self,
        host_alias: &str,
        remote_config_name: &str,
        endpoint_id: Option<&str>,
        auth_id: Option<&str>,
        repo: &RepoConfig,
    ) -> Result<&HostEntry> {
        validate_alias(host_alias)?;
        if self.get(host_alias).is_some() {
            return Err(SshmError::DuplicateHost(host_alias.to_string()));
        }

        let remote = repo.remote(remote_config_name)?;
        let endpoint = remote.select_endpoint(endpoint_id)?;
        let auth = remote.select_auth(auth_id)?;

        self.entries.push(HostEntry {
            host_alias: host_alias.to_string(),
            remote_config_name: remote.name.clone(),
            endpoint_id: endpoint.map(|e| e.id.clone()),
            auth_id: auth.map(|a| a.id.clone()),
            materialized_key_path: None,
        });
        tracing::debug!(host = %host_alias, remote = %remote.name, "host registered");

        let last = self.entries.len() - 1;
        Ok(&self.entries[last])
    }

    /// Remove by exact alias, or else by listing index.
    pub fn remove(&mut self, selector: &str) -> Result<HostEntry> {
        let position = self.position(selector)?;
        let entry = self.entries.remove(position);
        tracing::debug!(host = %entry.host_alias, "host unregistered");
        Ok(entry)
    }

    /// Resolve a selector to a listing index without removing anything.
    pub fn position(&self, selector: &str) -> Result<usize> {
        if let Some(position) = self.entries.iter().position(|e| e.host_alias == selector) {
            return Ok(position);
        }
        selector
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|&index| index < self.entries.len())
            .ok_or_else(|| SshmError::NotFound(selector.to_string()))
    }

    /// Entries in listing order, optionally filtered by alias.
    ///
    /// Patterns with `*`, `?` or `[` are globs over the whole alias; anything
    /// else is a substring match. Indices refer to the unfiltered listing.
    pub fn list(&self, pattern: Option<&str>) -> Vec<(usize, &HostEntry)> {
        let filter = pattern.map(NameFilter::new);
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter.as_ref().map_or(true, |f| f.matches(&e.host_alias)))
            .collect()
    }

    pub fn get(&self, alias: &str) -> Option<&HostEntry> {
        self.entries.iter().find(|e| e.host_alias == alias)
    }

    pub(crate) fn get_mut(&mut self, alias: &str) -> Option<&mut HostEntry> {
        self.entries.iter_mut().find(|e| e.host_alias == alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name filter shared by the list commands.
///
/// Patterns with `*`, `?` or `[` are globs over the whole name; anything else
/// (including a glob that fails to compile) is a substring match.
#[derive(Debug, Clone)]
pub enum NameFilter {
    Glob(glob::Pattern),
    Substring(String),
}

impl NameFilter {
    pub fn new(pattern: &str) -> Self {
        if pattern.contains(['*', '?', '[']) {
            match glob::Pattern::new(pattern) {
                Ok(glob) => return NameFilter::Glob(glob),
                Err(e) => tracing::debug!(%pattern, "not a valid glob ({e}); using substring match"),
            }
        }
        NameFilter::Substring(pattern.to_string())
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameFilter::Glob(glob) => glob.matches(name),
            NameFilter::Substring(needle) => name.contains(needle.as_str()),
        }
    }
}

/// Aliases become a bare `Host` token, so they cannot contain whitespace,
/// quotes or a comment character. They also name the host's key directory,
/// so they must be a single plain path component.
pub fn validate_alias(alias: &str) -> Result<()> {
    let bad_char = |c: char| {
        c.is_whitespace() || c.is_control() || matches!(c, '#' | '"' | '/' | '\\')
    };
    let mut components = Path::new(alias).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if alias.is_empty() || alias.chars().any(bad_char) || !single {
        return Err(SshmError::InvalidAlias(alias.to_string()));
    }
    Ok(())
}
