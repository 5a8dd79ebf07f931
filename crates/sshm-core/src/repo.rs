// ABOUTME: Key repository descriptor model (remote configs, endpoints, auth identities).
// ABOUTME: Parses the repo's config.json, resolves id references and validates identity files.

use crate::error::{Result, SshmError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// A host/port/user tuple a remote config can be reached at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub id: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub comment: Option<String>,
}

/// A private key (and optional public key) usable for a remote config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthIdentity {
    pub id: String,
    pub user: Option<String>,
    pub private_key_path: PathBuf,
    pub public_key_path: Option<PathBuf>,
    pub comment: Option<String>,
}

/// Additional SSH directive rendered verbatim into the host block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraOption {
    pub key: String,
    pub value: String,
    pub comment: Option<String>,
}

/// One named entry of the key repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteConfig {
    pub name: String,
    pub comment: Option<String>,
    pub endpoints: Vec<Endpoint>,
    pub auth_identities: Vec<AuthIdentity>,
    pub extra_options: Vec<ExtraOption>,
}

impl RemoteConfig {
    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn auth(&self, id: &str) -> Option<&AuthIdentity> {
        self.auth_identities.iter().find(|a| a.id == id)
    }

    /// Resolve an optional endpoint id. Omitted ids pick the sole option.
    pub fn select_endpoint(&self, id: Option<&str>) -> Result<Option<&Endpoint>> {
        select(&self.name, "endpoint", &self.endpoints, id, |e| &e.id)
    }

    /// Resolve an optional auth id. Omitted ids pick the sole option.
    pub fn select_auth(&self, id: Option<&str>) -> Result<Option<&AuthIdentity>> {
        select(&self.name, "auth identity", &self.auth_identities, id, |a| &a.id)
    }
}

fn select<'a, T>(
    remote: &str,
    kind: &'static str,
    items: &'a [T],
    id: Option<&str>,
    id_of: impl Fn(&T) -> &String,
) -> Result<Option<&'a T>> {
    match id {
        Some(id) => items
            .iter()
            .find(|item| id_of(*item) == id)
            .map(Some)
            .ok_or_else(|| SshmError::UnknownReference {
                kind,
                value: id.to_string(),
                context: Some(remote.to_string()),
            }),
        None => match items.len() {
            0 => Ok(None),
            1 => Ok(items.first()),
            count => Err(SshmError::AmbiguousReference {
                remote: remote.to_string(),
                kind,
                count,
            }),
        },
    }
}

/// All remote configs of the key repository, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RepoConfig {
    path: PathBuf,
    remotes: BTreeMap<String, RemoteConfig>,
}

impl RepoConfig {
    /// Load `<repo_root>/config.json`.
    pub fn load(repo_root: &Path) -> Result<Self> {
        let path = repo_root.join("config.json");
        let content = std::fs::read_to_string(&path).map_err(|e| SshmError::io(&path, e))?;
        Self::parse(&content, &path, repo_root)
    }

    /// Parse descriptor text. Key paths are anchored at `repo_root`.
    pub fn parse(content: &str, path: &Path, repo_root: &Path) -> Result<Self> {
        let parse_err = |message: String| SshmError::ConfigParse {
            path: path.to_path_buf(),
            message,
        };

        let raw: Vec<RawRemote> =
            serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?;

        let mut remotes = BTreeMap::new();
        for entry in raw {
            let remote = entry.into_remote(repo_root).map_err(parse_err)?;
            if remotes.contains_key(&remote.name) {
                return Err(parse_err(format!("duplicate ServerName '{}'", remote.name)));
            }
            remotes.insert(remote.name.clone(), remote);
        }

        Ok(Self {
            path: path.to_path_buf(),
            remotes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.get(name)
    }

    /// Look up a remote config, failing with `UnknownReference`.
    pub fn remote(&self, name: &str) -> Result<&RemoteConfig> {
        self.get(name).ok_or_else(|| SshmError::UnknownReference {
            kind: "remote config",
            value: name.to_string(),
            context: None,
        })
    }

    /// Remote config names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.remotes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteConfig> {
        self.remotes.values()
    }

    pub fn len(&self) -> usize {
        self.remotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// Validate the repository: non-empty, and every identity file readable.
    pub fn check(&self) -> CheckReport {
        let mut report = CheckReport {
            remotes: self.remotes.len(),
            ..CheckReport::default()
        };

        if self.remotes.is_empty() {
            report
                .problems
                .push(format!("{} defines no remote configs", self.path.display()));
        }

        for remote in self.remotes.values() {
            for auth in &remote.auth_identities {
                report.identities += 1;
                if let Err(e) = std::fs::File::open(&auth.private_key_path) {
                    report.problems.push(format!(
                        "{} auth '{}': identity file {} not readable ({e})",
                        remote.name,
                        auth.id,
                        auth.private_key_path.display()
                    ));
                }
            }
        }

        report
    }
}

/// Outcome of [`RepoConfig::check`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub remotes: usize,
    pub identities: usize,
    pub problems: Vec<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

// ---------------------------------------------------------------------------
// On-disk format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawRemote {
    #[serde(rename = "ServerName")]
    server_name: String,
    #[serde(rename = "Comment", default)]
    comment: Option<String>,
    #[serde(rename = "Endpoint", default)]
    endpoints: Vec<RawEndpoint>,
    #[serde(rename = "Authentication", default)]
    auths: Vec<RawAuth>,
    #[serde(rename = "ExtraConfig", default)]
    extra: Vec<RawExtra>,
}

#[derive(Deserialize)]
struct RawEndpoint {
    #[serde(rename = "Id", default)]
    id: Option<Scalar>,
    #[serde(rename = "HostName")]
    host: String,
    #[serde(rename = "Port", default)]
    port: Option<Scalar>,
    #[serde(rename = "User", default)]
    user: Option<String>,
    #[serde(rename = "Comment", default)]
    comment: Option<String>,
}

#[derive(Deserialize)]
struct RawAuth {
    #[serde(rename = "Id", default)]
    id: Option<Scalar>,
    #[serde(rename = "User", default)]
    user: Option<String>,
    #[serde(rename = "IdentityFile")]
    identity_file: String,
    #[serde(rename = "PublicKeyFile", default)]
    public_key_file: Option<String>,
    #[serde(rename = "Comment", default)]
    comment: Option<String>,
}

#[derive(Deserialize)]
struct RawExtra {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: String,
    #[serde(rename = "Comment", default)]
    comment: Option<String>,
}

/// Trim and drop empty strings.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn key_path(repo_root: &Path, value: &str) -> PathBuf {
    let expanded = shellexpand::tilde(value.trim());
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        path
    } else {
        repo_root.join(path)
    }
}

fn check_unique_ids<'a>(
    remote: &str,
    kind: &str,
    ids: impl Iterator<Item = &'a String>,
) -> std::result::Result<(), String> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(format!("duplicate {kind} id '{id}' in '{remote}'"));
        }
    }
    Ok(())
}

impl RawRemote {
    fn into_remote(self, repo_root: &Path) -> std::result::Result<RemoteConfig, String> {
        let name = self.server_name.trim().to_string();
        if name.is_empty() {
            return Err("ServerName must not be empty".to_string());
        }

        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for (idx, raw) in self.endpoints.into_iter().enumerate() {
            let port = match raw.port {
                None => None,
                Some(scalar) => {
                    let text = scalar.into_string();
                    if text.is_empty() {
                        None
                    } else {
                        Some(text.parse::<u16>().map_err(|_| {
                            format!("invalid Port '{text}' in '{name}' endpoint {idx}")
                        })?)
                    }
                }
            };
            endpoints.push(Endpoint {
                id: raw
                    .id
                    .map(Scalar::into_string)
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| idx.to_string()),
                host: raw.host.trim().to_string(),
                port,
                user: clean(raw.user),
                comment: clean(raw.comment),
            });
        }

        let auth_identities: Vec<AuthIdentity> = self
            .auths
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| AuthIdentity {
                id: raw
                    .id
                    .map(Scalar::into_string)
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| idx.to_string()),
                user: clean(raw.user),
                private_key_path: key_path(repo_root, &raw.identity_file),
                public_key_path: clean(raw.public_key_file).map(|p| key_path(repo_root, &p)),
                comment: clean(raw.comment),
            })
            .collect();

        check_unique_ids(&name, "endpoint", endpoints.iter().map(|e| &e.id))?;
        check_unique_ids(&name, "auth", auth_identities.iter().map(|a| &a.id))?;

        let extra_options = self
            .extra
            .into_iter()
            .map(|raw| ExtraOption {
                key: raw.key.trim().to_string(),
                value: raw.value.trim().to_string(),
                comment: clean(raw.comment),
            })
            .collect();

        Ok(RemoteConfig {
            name,
            comment: clean(self.comment),
            endpoints,
            auth_identities,
            extra_options,
        })
    }
}
