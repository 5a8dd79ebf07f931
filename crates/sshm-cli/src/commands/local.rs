// ABOUTME: Implementation of 'ssh-manager local list'
// ABOUTME: Shows managed hosts of the local ssh config with their removal indices

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use sshm_core::{HostEntry, RepoConfig, Segment};

use super::ListArgs;
use crate::Context;

/// One row of `local list --json`.
#[derive(Debug, Serialize)]
struct LocalHost<'a> {
    index: usize,
    #[serde(flatten)]
    entry: &'a HostEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

pub fn list(ctx: &Context, args: ListArgs) -> Result<()> {
    let writer = ctx.writer(false);
    let segments = writer.segments()?;
    let registry = sshm_core::HostRegistry::from_segments(&segments);

    // Details are best-effort: the listing works before the first pull.
    let repo = match ctx.load_repo() {
        Ok(repo) => Some(repo),
        Err(e) => {
            tracing::debug!("remote details unavailable: {e:#}");
            None
        }
    };

    let rows: Vec<LocalHost<'_>> = registry
        .list(args.pattern.as_deref())
        .into_iter()
        .map(|(index, entry)| describe(index, entry, repo.as_ref()))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("{}", "No managed hosts".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!("Managed hosts in {} ({})", writer.destination().display(), rows.len()).bold()
    );
    let width = rows.iter().map(|r| r.entry.host_alias.len()).max().unwrap_or(0);
    for row in &rows {
        println!(
            "{}  {}  {}",
            format!("{:>4}", row.index).cyan(),
            format!("{:<width$}", row.entry.host_alias).bold(),
            summarize(row).dimmed(),
        );
    }

    if args.verbose {
        for row in &rows {
            let text = segments.iter().find_map(|s| match s {
                Segment::Managed(b) if b.header.alias == row.entry.host_alias => Some(&b.text),
                _ => None,
            });
            if let Some(text) = text {
                println!();
                println!("{}", format!("── {} ──", row.entry.host_alias).cyan());
                print!("{text}");
            }
        }
    }
    Ok(())
}

fn describe<'a>(index: usize, entry: &'a HostEntry, repo: Option<&RepoConfig>) -> LocalHost<'a> {
    let remote = repo.and_then(|r| r.get(&entry.remote_config_name));
    let endpoint = remote.and_then(|r| entry.endpoint_id.as_deref().and_then(|id| r.endpoint(id)));
    let auth = remote.and_then(|r| entry.auth_id.as_deref().and_then(|id| r.auth(id)));

    LocalHost {
        index,
        entry,
        hostname: endpoint.map(|e| e.host.clone()),
        port: endpoint.and_then(|e| e.port),
        user: auth
            .and_then(|a| a.user.clone())
            .or_else(|| endpoint.and_then(|e| e.user.clone())),
    }
}

fn summarize(row: &LocalHost<'_>) -> String {
    let mut parts = Vec::new();
    match (&row.hostname, row.port) {
        (Some(host), Some(port)) => parts.push(format!("{host}:{port}")),
        (Some(host), None) => parts.push(host.clone()),
        _ => {}
    }
    if let Some(user) = &row.user {
        parts.push(format!("user={user}"));
    }
    if let Some(key) = &row.entry.materialized_key_path {
        parts.push(format!("id={}", key.display()));
    }
    parts.push(format!("remote={}", row.entry.remote_config_name));
    parts.join(", ")
}
