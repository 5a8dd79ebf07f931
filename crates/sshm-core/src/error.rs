// ABOUTME: Error types for the reconciliation engine using thiserror.
// ABOUTME: Covers registry references, identity files, config parsing, git and IO failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, reconciling or writing SSH config.
#[derive(Error, Debug)]
pub enum SshmError {
    /// A host alias is already present in the registry.
    #[error("host '{0}' already exists in the local ssh config")]
    DuplicateHost(String),

    /// A remote config, endpoint or auth id does not resolve.
    #[error("unknown {kind} '{value}'{}", context_suffix(.context))]
    UnknownReference {
        kind: &'static str,
        value: String,
        context: Option<String>,
    },

    /// An id was omitted but the remote config offers several choices.
    #[error("remote config '{remote}' has {count} {kind} options; pick one by id")]
    AmbiguousReference {
        remote: String,
        kind: &'static str,
        count: usize,
    },

    /// The alias cannot be used as an SSH `Host` token.
    #[error("invalid host alias '{0}': must be non-empty without whitespace or '#'")]
    InvalidAlias(String),

    /// Neither an alias nor a valid index matched.
    #[error("no host named or indexed '{0}' in the local ssh config")]
    NotFound(String),

    /// A referenced identity file is absent or unreadable.
    #[error("identity file {path} is missing or unreadable: {source}")]
    IdentityFileMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set file permissions.
    #[error("failed to set permissions on {path}: {source}")]
    Permission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manager or repository descriptor is malformed.
    #[error("failed to parse config {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Generic read/write failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No data root could be located.
    #[error("unable to locate data root: set SSH_MANAGER_DATA_ROOT or create a {marker} marker file")]
    DataRootNotFound { marker: &'static str },

    /// A git command failed.
    #[error("git {command} failed: {message}")]
    Git { command: String, message: String },
}

fn context_suffix(context: &Option<String>) -> String {
    match context {
        Some(ctx) => format!(" in remote config '{ctx}'"),
        None => String::new(),
    }
}

impl SshmError {
    /// Wrap an io error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SshmError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias using SshmError.
pub type Result<T> = std::result::Result<T, SshmError>;
