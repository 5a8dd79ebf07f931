// ABOUTME: Implementation of 'ssh-manager flush'
// ABOUTME: Regenerates every managed block from the key repository

use anyhow::Result;

use super::print_report;
use crate::Context;

pub fn run(ctx: &Context, dry_run: bool) -> Result<()> {
    let repo = ctx.load_repo()?;
    let writer = ctx.writer(dry_run);
    let mut registry = writer.load_registry()?;

    let report = writer.flush(&mut registry, &repo)?;
    print_report(&report);
    Ok(())
}
