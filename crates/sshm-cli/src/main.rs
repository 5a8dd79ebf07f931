// ABOUTME: Entry point for the ssh-manager CLI
// ABOUTME: Parses arguments, runs the command and maps failures to exit codes

use clap::Parser;
use colored::Colorize;
use sshm_cli::commands::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match sshm_cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(sshm_cli::exit_code(&e))
        }
    }
}
