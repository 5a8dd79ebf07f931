// ABOUTME: Implementation of 'ssh-manager remote list' and 'remote show'
// ABOUTME: Browses remote configs defined in the key repository

use anyhow::{anyhow, Result};
use colored::Colorize;
use sshm_core::{NameFilter, RemoteConfig};
use std::collections::BTreeMap;

use super::ListArgs;
use crate::{Context, APP_NAME};

pub fn list(ctx: &Context, args: ListArgs) -> Result<()> {
    let repo = ctx.load_repo()?;
    let filter = args.pattern.as_deref().map(NameFilter::new);
    let remotes: Vec<&RemoteConfig> = repo
        .iter()
        .filter(|r| filter.as_ref().map_or(true, |f| f.matches(&r.name)))
        .collect();

    if args.json {
        let json = if args.verbose {
            let by_name: BTreeMap<&str, &RemoteConfig> =
                remotes.iter().map(|r| (r.name.as_str(), *r)).collect();
            serde_json::to_string_pretty(&by_name)?
        } else {
            let names: Vec<&str> = remotes.iter().map(|r| r.name.as_str()).collect();
            serde_json::to_string_pretty(&names)?
        };
        println!("{json}");
        return Ok(());
    }

    if remotes.is_empty() {
        println!("{}", "No remote configs".dimmed());
        return Ok(());
    }

    println!("{}", format!("Remote configs ({})", remotes.len()).bold());
    for (idx, remote) in remotes.iter().enumerate() {
        let counts = format!(
            "{} endpoints, {} identities",
            remote.endpoints.len(),
            remote.auth_identities.len()
        );
        match &remote.comment {
            Some(comment) => println!(
                "{}  {}  {} {}",
                format!("{idx:>4}").cyan(),
                remote.name.bold(),
                counts.dimmed(),
                format!("# {comment}").dimmed()
            ),
            None => println!(
                "{}  {}  {}",
                format!("{idx:>4}").cyan(),
                remote.name.bold(),
                counts.dimmed()
            ),
        }
    }

    if args.verbose {
        for remote in remotes {
            println!();
            print_details(remote);
        }
    }
    Ok(())
}

pub fn show(ctx: &Context, name: &str, json: bool) -> Result<()> {
    let repo = ctx.load_repo()?;
    let remote = repo
        .remote(name)
        .map_err(|e| anyhow!("{e}; run '{APP_NAME} remote list' to see available names"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(remote)?);
        return Ok(());
    }

    print_details(remote);
    Ok(())
}

fn print_details(remote: &RemoteConfig) {
    println!("{} {}", "Remote config:".bold(), remote.name.green().bold());
    if let Some(comment) = &remote.comment {
        println!("  {}", comment.dimmed());
    }

    println!("  {}", "Endpoints".bold());
    if remote.endpoints.is_empty() {
        println!("    {}", "none".dimmed());
    }
    for endpoint in &remote.endpoints {
        let address = match endpoint.port {
            Some(port) => format!("{}:{port}", endpoint.host),
            None => endpoint.host.clone(),
        };
        let user = endpoint
            .user
            .as_deref()
            .map(|u| format!(" user={u}"))
            .unwrap_or_default();
        println!(
            "    {} {address}{user}{}",
            format!("[{}]", endpoint.id).cyan(),
            comment_suffix(endpoint.comment.as_deref())
        );
    }

    println!("  {}", "Authentication".bold());
    if remote.auth_identities.is_empty() {
        println!("    {}", "none".dimmed());
    }
    for auth in &remote.auth_identities {
        let user = auth
            .user
            .as_deref()
            .map(|u| format!("user={u} "))
            .unwrap_or_default();
        println!(
            "    {} {user}{}{}",
            format!("[{}]", auth.id).cyan(),
            auth.private_key_path.display(),
            comment_suffix(auth.comment.as_deref())
        );
    }

    if !remote.extra_options.is_empty() {
        println!("  {}", "Extra options".bold());
        for extra in &remote.extra_options {
            println!(
                "    {} {}{}",
                extra.key,
                extra.value,
                comment_suffix(extra.comment.as_deref())
            );
        }
    }
}

fn comment_suffix(comment: Option<&str>) -> String {
    comment
        .map(|c| format!("  {}", format!("# {c}").dimmed()))
        .unwrap_or_default()
}
