//! # tb - personal task tracker with reminders
//!
//! A command-line task tracker whose interesting part is what happens around due
//! dates: repeating tasks roll forward to their next occurrence when completed, and
//! a polling loop delivers each due-date reminder at most once per occurrence.
//!
//! ## Quick Start
//!
//! ```bash
//! # A weekly task with a reminder an hour before
//! tb add "Take out bins" --due "friday 07:00" --repeat weekly --remind 60
//!
//! # Complete it; the next occurrence is created for the following week
//! tb complete 1
//!
//! # Allow reminders once, then keep a watcher running
//! tb permission request
//! tb watch
//! ```
//!
//! ## Key Commands
//!
//! - `tb add <title>` - Create a task with optional due time, repeat, and reminder
//! - `tb list` - Open tasks, soonest due first
//! - `tb complete <id>` - Finish a task (spawns the next occurrence if repeating)
//! - `tb due <id> <when>` - Reschedule; a sent reminder is re-armed
//! - `tb remind` - Poll once and print what is due
//! - `tb watch` - Deliver reminders every minute while permitted
//! - `tb config init` - Write a config file with the current settings
//!
//! Data is stored locally in `~/.taskbell/` (`tasks.json`, `permissions.json`);
//! settings live in `~/.config/taskbell/config.toml`.

use clap::Parser;

pub mod cli;
pub mod clock;
pub mod cmd;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod fields;
pub mod lifecycle;
pub mod permission;
pub mod recurrence;
pub mod reminders;
pub mod task;

use cli::Cli;
use cmd::run;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("taskbell=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
