// ABOUTME: ssh-manager reconciliation engine: keeps an SSH config in sync with a key repository.
// ABOUTME: Re-exports the registry, block renderer, identity materializer and config writer.

//! # sshm-core
//!
//! The engine behind the `ssh-manager` CLI. A [`HostRegistry`] of aliases
//! bound to remote configs from a [`RepoConfig`] is reconciled into the
//! user's SSH config by a [`ConfigWriter`]:
//!
//! ```text
//! read destination -> parse segments -> plan blocks -> backup -> atomic write
//! ```
//!
//! Text outside the `# >>> ssh-manager` markers is never modified.

pub mod block;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod identity;
pub mod paths;
pub mod registry;
pub mod repo;
pub mod writer;

pub use block::{ManagedBlock, Segment};
pub use config::ManagerConfig;
pub use error::{Result, SshmError};
pub use git::KeyRepo;
pub use identity::{IdentityMaterializer, SetMode};
pub use paths::DataRoot;
pub use registry::{HostEntry, HostRegistry, NameFilter};
pub use repo::{AuthIdentity, CheckReport, Endpoint, ExtraOption, RemoteConfig, RepoConfig};
pub use writer::{AtomicPersist, ConfigWriter, FlushReport, Persist};
