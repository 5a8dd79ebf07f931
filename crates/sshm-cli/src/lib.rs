// ABOUTME: CLI library for ssh-manager: context loading and command dispatch.
// ABOUTME: Commands live in `commands`; this module resolves config and logging first.

//! # sshm-cli
//!
//! ```text
//! ssh-manager
//! ├── pull                      # Clone or update the key repository
//! ├── check                     # Validate the repository's config.json
//! ├── local list                # Hosts managed in the local ssh config
//! ├── remote
//! │   ├── list                  # Remote configs in the key repository
//! │   └── show <name>           # Endpoints, identities and extra options
//! ├── add <remote-config>       # Add a host block and install its key
//! ├── remove <alias|index>      # Drop a host block and its key copies
//! └── flush                     # Regenerate every managed block
//! ```

use anyhow::{Context as _, Result};
use sshm_core::{ConfigWriter, DataRoot, KeyRepo, ManagerConfig, RepoConfig, SshmError};
use std::fmt;
use std::path::{Path, PathBuf};

pub mod commands;

use commands::{Cli, Command, LocalCommand, RemoteCommand};

/// Name used for log files and user-facing hints.
pub const APP_NAME: &str = "ssh-manager";

/// A problem with how the tool was invoked or set up, rather than a failed
/// operation. Exits with status 2.
#[derive(Debug)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

/// Process exit status for an error returned by [`run`].
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<UsageError>().is_some() {
        2
    } else {
        1
    }
}

/// Resolved data root and manager configuration shared by all commands.
pub struct Context {
    pub root: DataRoot,
    pub config: ManagerConfig,
}

impl Context {
    /// Locate and parse the manager config.
    ///
    /// Without `--config` the data root must be discoverable. With it, a
    /// relative path is taken from the data root when there is one, else
    /// from the working directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (root, path) = resolve_config_path(explicit)?;
        if !path.exists() {
            return Err(UsageError(format!(
                "config file not found at {}; pass --config or create it first",
                path.display()
            ))
            .into());
        }

        let config = ManagerConfig::load_from(&path, &root)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        Ok(Self { root, config })
    }

    pub fn key_repo(&self) -> KeyRepo {
        KeyRepo::from_config(&self.config)
    }

    pub fn writer(&self, dry_run: bool) -> ConfigWriter {
        ConfigWriter::new(&self.config.ssh_config, &self.config.ssh_dir).dry_run(dry_run)
    }

    /// Load the key repository's config.json, pointing at `pull` if absent.
    pub fn load_repo(&self) -> Result<RepoConfig> {
        let path = self.config.repo_config_path();
        if !path.exists() {
            return Err(UsageError(format!(
                "remote repository config not found at {}; run '{APP_NAME} pull' first",
                path.display()
            ))
            .into());
        }
        self.key_repo()
            .load_config()
            .context("failed to read remote repository config")
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Result<(DataRoot, PathBuf)> {
    let discovered = DataRoot::discover();

    let Some(explicit) = explicit else {
        let root = discovered.map_err(|e| UsageError(e.to_string()))?;
        let path = root.config_path();
        return Ok((root, path));
    };

    let value = explicit.to_string_lossy();
    match discovered {
        Ok(root) => {
            let path = root.resolve(&value, root.path());
            Ok((root, path))
        }
        Err(SshmError::DataRootNotFound { .. }) => {
            let cwd = std::env::current_dir().context("failed to read working directory")?;
            let path = DataRoot::new(&cwd).resolve(&value, &cwd);
            let parent = path.parent().map(Path::to_path_buf).unwrap_or(cwd);
            tracing::debug!(root = %parent.display(), "no data root marker; using config directory");
            Ok((DataRoot::new(parent), path))
        }
        Err(e) => Err(e.into()),
    }
}

/// Run a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let level = sshm_log::level_for(cli.verbose, cli.quiet);

    let ctx = match Context::load(cli.config.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            sshm_log::init(level);
            return Err(e);
        }
    };
    sshm_log::init_with_file(level, &ctx.config.log_dir, APP_NAME);
    tracing::debug!(
        root = %ctx.root.path().display(),
        config = %ctx.config.config_path.display(),
        "context loaded"
    );

    if cli.auto_pull && !matches!(cli.command, Command::Pull) {
        ctx.key_repo().pull().context("auto-pull failed")?;
    }

    match cli.command {
        Command::Pull => commands::sync::pull(&ctx),
        Command::Check => commands::sync::check(&ctx),
        Command::Local(LocalCommand::List(args)) => commands::local::list(&ctx, args),
        Command::Remote(RemoteCommand::List(args)) => commands::remote::list(&ctx, args),
        Command::Remote(RemoteCommand::Show { name, json }) => {
            commands::remote::show(&ctx, &name, json)
        }
        Command::Add(args) => commands::add::run(&ctx, args),
        Command::Remove(args) => commands::remove::run(&ctx, args),
        Command::Flush { dry_run } => commands::flush::run(&ctx, dry_run),
    }
}
