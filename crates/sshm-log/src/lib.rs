// ABOUTME: Shared logging setup for ssh-manager binaries
// ABOUTME: init() logs to stderr, init_with_file() also appends to a dated daily log file

use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Daily log files older than this many days are pruned on startup.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Map a `-v` count (or `--quiet`) to a default level. RUST_LOG still wins.
pub fn level_for(verbosity: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Standard logging to stderr at `level`, RUST_LOG override.
pub fn init(level: Level) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

/// Stderr logging plus a daily file at `<log_dir>/<app_name>-YYYY-MM-DD.log`.
/// The file always records INFO and above so flushes and backups leave a trail.
/// If the file cannot be opened, prints a warning and falls back to init().
pub fn init_with_file(level: Level, log_dir: &Path, app_name: &str) {
    let file = match open_daily_file(log_dir, app_name) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: failed to set up file logging: {e}");
            init(level);
            return;
        }
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env().add_directive(level.into()));
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

fn open_daily_file(log_dir: &Path, app_name: &str) -> std::io::Result<File> {
    fs::create_dir_all(log_dir)?;
    let today = Local::now().date_naive();
    let path = daily_log_path(log_dir, app_name, today);
    prune_old_logs(log_dir, app_name, today, DEFAULT_RETENTION_DAYS)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// Path of the log file for `date`.
pub fn daily_log_path(log_dir: &Path, app_name: &str, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("{app_name}-{}.log", date.format("%Y-%m-%d")))
}

/// Delete `<app_name>-YYYY-MM-DD.log` files older than `retention_days` days.
/// Files whose suffix is not a date are left alone. Returns how many were removed.
pub fn prune_old_logs(
    log_dir: &Path,
    app_name: &str,
    today: NaiveDate,
    retention_days: i64,
) -> std::io::Result<usize> {
    let cutoff = today - chrono::Duration::days(retention_days.max(1) - 1);
    let prefix = format!("{app_name}-");
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".log"))
        else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}
