// ABOUTME: Implementation of 'ssh-manager remove'
// ABOUTME: Drops a managed host by alias or index, flushes, then deletes its key copies

use anyhow::{Context as _, Result};
use colored::Colorize;
use dialoguer::Confirm;

use super::{print_report, RemoveArgs};
use crate::Context;

pub fn run(ctx: &Context, args: RemoveArgs) -> Result<()> {
    let writer = ctx.writer(args.dry_run);
    let mut registry = writer.load_registry()?;
    let position = registry.position(&args.target)?;
    let alias = registry
        .iter()
        .nth(position)
        .map(|entry| entry.host_alias.clone())
        .unwrap_or_else(|| args.target.clone());

    if !args.yes && !args.dry_run {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove '{alias}' from ssh config?"))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Canceled".dimmed());
            return Ok(());
        }
    }

    let repo = ctx.load_repo()?;
    let removed = registry.remove(&alias)?;
    let report = writer.flush(&mut registry, &repo)?;
    print_report(&report);

    if !report.dry_run {
        writer
            .materializer()
            .discard(&removed)
            .with_context(|| format!("removed '{alias}' but failed to delete its key copies"))?;
        println!("{} '{alias}'", "Removed".green().bold());
    }
    Ok(())
}
