use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Personal task tracker with recurring tasks and due-date reminders.
/// Storage defaults to ~/.taskbell/tasks.json or a path passed via --db.
#[derive(Parser)]
#[command(name = "tb", version, about = "Personal task tracker with recurring tasks and reminders")]
pub struct Cli {
    /// Path to the JSON database file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Account to act as (defaults to the configured owner).
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Civil UTC offset for due times and recurrence, e.g. +02:00.
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub utc_offset: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}
