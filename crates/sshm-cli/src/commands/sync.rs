// ABOUTME: Implementation of 'ssh-manager pull' and 'ssh-manager check'
// ABOUTME: Syncs the key repository and validates its config.json

use anyhow::{bail, Context as _, Result};
use colored::Colorize;

use crate::Context;

pub fn pull(ctx: &Context) -> Result<()> {
    let repo = ctx.key_repo();
    repo.pull().context("failed to pull remote repo")?;
    let config = ctx.load_repo()?;

    println!(
        "{} {} ({} remote configs)",
        "Pulled".green().bold(),
        repo.local_path().display(),
        config.len()
    );
    Ok(())
}

pub fn check(ctx: &Context) -> Result<()> {
    ctx.load_repo()?;
    let report = ctx.key_repo().check()?;

    if report.is_ok() {
        println!(
            "{} {} remote configs, {} identity files",
            "OK".green().bold(),
            report.remotes,
            report.identities
        );
        return Ok(());
    }

    for problem in &report.problems {
        println!("{} {problem}", "✗".red());
    }
    bail!("{} problem(s) found in the key repository", report.problems.len());
}
