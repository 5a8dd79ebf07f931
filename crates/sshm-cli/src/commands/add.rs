// ABOUTME: Implementation of 'ssh-manager add'
// ABOUTME: Registers a host for a remote config, prompting for ambiguous choices, then flushes

use anyhow::{anyhow, Result};
use colored::Colorize;
use dialoguer::Select;
use sshm_core::{RemoteConfig, SshmError};

use super::{print_report, AddArgs};
use crate::{Context, UsageError, APP_NAME};

pub fn run(ctx: &Context, args: AddArgs) -> Result<()> {
    let repo = ctx.load_repo()?;
    let writer = ctx.writer(args.dry_run);
    let mut registry = writer.load_registry()?;

    let alias = args.alias.as_deref().unwrap_or(&args.remote_config);
    if registry.get(alias).is_some() {
        return Err(SshmError::DuplicateHost(alias.to_string()).into());
    }

    let remote = repo
        .remote(&args.remote_config)
        .map_err(|e| anyhow!("{e}; run '{APP_NAME} remote list' to see available names"))?;

    let endpoint_id = match args.endpoint_id {
        Some(id) => Some(id),
        None => choose(
            remote,
            "endpoint",
            endpoint_labels(remote),
            args.non_interactive,
        )?,
    };
    let auth_id = match args.auth_id {
        Some(id) => Some(id),
        None => choose(remote, "auth", auth_labels(remote), args.non_interactive)?,
    };

    registry.add(
        alias,
        &remote.name,
        endpoint_id.as_deref(),
        auth_id.as_deref(),
        &repo,
    )?;

    let report = writer.flush(&mut registry, &repo)?;
    print_report(&report);
    if !report.dry_run {
        println!("{} '{alias}' from remote config '{}'", "Added".green().bold(), remote.name);
    }
    Ok(())
}

/// Pick an id when several are available. Returns `None` when there is at
/// most one option, leaving the choice to the registry.
fn choose(
    remote: &RemoteConfig,
    kind: &str,
    options: Vec<(String, String)>,
    non_interactive: bool,
) -> Result<Option<String>> {
    if options.len() < 2 {
        return Ok(None);
    }
    if non_interactive {
        return Err(UsageError(format!(
            "remote config '{}' has {} {kind} options; pass --{kind}-id or see '{APP_NAME} remote show {}'",
            remote.name,
            options.len(),
            remote.name
        ))
        .into());
    }

    let labels: Vec<&str> = options.iter().map(|(_, label)| label.as_str()).collect();
    let picked = Select::new()
        .with_prompt(format!("Select {kind} for '{}'", remote.name))
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(options.into_iter().nth(picked).map(|(id, _)| id))
}

fn endpoint_labels(remote: &RemoteConfig) -> Vec<(String, String)> {
    remote
        .endpoints
        .iter()
        .map(|e| {
            let mut label = format!("[{}] {}", e.id, e.host);
            if let Some(port) = e.port {
                label.push_str(&format!(":{port}"));
            }
            if let Some(comment) = &e.comment {
                label.push_str(&format!("  # {comment}"));
            }
            (e.id.clone(), label)
        })
        .collect()
}

fn auth_labels(remote: &RemoteConfig) -> Vec<(String, String)> {
    remote
        .auth_identities
        .iter()
        .map(|a| {
            let mut label = format!("[{}] ", a.id);
            if let Some(user) = &a.user {
                label.push_str(&format!("{user} "));
            }
            label.push_str(&a.private_key_path.display().to_string());
            if let Some(comment) = &a.comment {
                label.push_str(&format!("  # {comment}"));
            }
            (a.id.clone(), label)
        })
        .collect()
}
