// ABOUTME: CLI command definitions using clap
// ABOUTME: Defines global flags and the subcommands of ssh-manager

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use sshm_core::FlushReport;
use std::path::PathBuf;

pub mod add;
pub mod flush;
pub mod local;
pub mod remote;
pub mod remove;
pub mod sync;

#[derive(Parser, Debug)]
#[command(
    name = "ssh-manager",
    version,
    about = "Manage your SSH config alongside a shared key repository"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the manager config.json (defaults to <data root>/config.json)
    #[arg(short, long, global = true, env = "SSH_MANAGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pull the key repository before running the command
    #[arg(long, global = true)]
    pub auto_pull: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "log-verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clone or update the key repository
    Pull,

    /// Validate the key repository's config.json and identity files
    Check,

    /// Inspect the local ssh config
    #[command(subcommand)]
    Local(LocalCommand),

    /// Inspect remote configs in the key repository
    #[command(subcommand)]
    Remote(RemoteCommand),

    /// Add a host for a remote config and write the ssh config
    Add(AddArgs),

    /// Remove a managed host and write the ssh config
    Remove(RemoveArgs),

    /// Regenerate every managed host block
    Flush {
        /// Show the diff without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum LocalCommand {
    /// List managed hosts with their indices
    List(ListArgs),
}

#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// List remote config names
    List(ListArgs),

    /// Show one remote config
    Show {
        /// Remote config name
        name: String,

        /// Output JSON for scripting
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Filter by name: glob when it contains *, ? or [, substring otherwise
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Output JSON for scripting
    #[arg(long)]
    pub json: bool,

    /// Show full details
    #[arg(long = "verbose", id = "list_verbose")]
    pub verbose: bool,
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Remote config name to add locally
    pub remote_config: String,

    /// Host alias to use (defaults to the remote config name)
    #[arg(long)]
    pub alias: Option<String>,

    /// Endpoint id to use (see `remote show`)
    #[arg(long)]
    pub endpoint_id: Option<String>,

    /// Authentication id to use (see `remote show`)
    #[arg(long)]
    pub auth_id: Option<String>,

    /// Fail instead of prompting when several choices exist
    #[arg(long)]
    pub non_interactive: bool,

    /// Show the diff without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Host alias, or its index from `local list`
    pub target: String,

    /// Skip confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Show the diff without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Print the outcome of a flush.
pub(crate) fn print_report(report: &FlushReport) {
    if report.dry_run {
        if report.diff.is_empty() {
            println!("{}", "Dry run: ssh config already up to date".dimmed());
            return;
        }
        println!(
            "{} {}",
            "Dry run:".yellow().bold(),
            format!("changes to {}", report.destination.display()).dimmed()
        );
        for line in report.diff.lines() {
            match line.chars().next() {
                Some('+') => println!("{}", line.green()),
                Some('-') => println!("{}", line.red()),
                Some('@') => println!("{}", line.cyan()),
                _ => println!("{line}"),
            }
        }
        return;
    }

    if !report.changed {
        println!("{}", "ssh config already up to date".dimmed());
        return;
    }
    println!(
        "{} {} ({} managed hosts)",
        "Wrote".green().bold(),
        report.destination.display(),
        report.managed_blocks
    );
    if let Some(backup) = &report.backup {
        println!("  {}: {}", "Backup".dimmed(), backup.display());
    }
}
