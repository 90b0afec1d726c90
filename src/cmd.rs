//! Command implementations for the CLI interface.
//!
//! This module contains the subcommand definitions and their handlers, from
//! adding and completing tasks to the one-shot reminder poll and the long-running
//! `watch` loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use clap::Subcommand;
use clap_complete::{generate, Shell};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::clock::{Clock, ManualClock, SystemClock};
use crate::config::{parse_utc_offset, Config};
use crate::db::*;
use crate::dispatch::{supervise, ConsoleSink, Notification, NotificationDispatchLoop};
use crate::error::{Result, TaskError};
use crate::fields::*;
use crate::lifecycle::OccurrenceLifecycleManager;
use crate::permission::{FilePermissionProvider, PermissionGate, PermissionState};
use crate::recurrence::RecurrenceCalculator;
use crate::reminders::ReminderDueSelector;
use crate::task::{NewTask, Subtask, Task};

#[derive(Subcommand)]
pub enum Commands {
    /// Add a new task.
    Add {
        /// Short title for the task.
        title: String,
        /// Due: "YYYY-MM-DD HH:MM", "today 17:00", "tomorrow", "friday", or "in 2h".
        #[arg(long)]
        due: Option<String>,
        /// Priority: high | medium | low.
        #[arg(long, value_enum, default_value_t = Priority::Medium)]
        priority: Priority,
        /// Repeat pattern: daily | weekly | monthly | yearly. Requires --due.
        #[arg(long, value_enum)]
        repeat: Option<RecurrencePattern>,
        /// Remind this many minutes before the due time.
        #[arg(long, value_name = "MINUTES")]
        remind: Option<u32>,
        /// Comma-separated tags. May be repeated.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Checklist item. May be repeated; order is kept.
        #[arg(long = "subtask")]
        subtasks: Vec<String>,
    },

    /// List tasks.
    List {
        /// Include completed tasks.
        #[arg(long)]
        all: bool,
        /// Sort key.
        #[arg(long, value_enum, default_value_t = SortKey::Due)]
        sort: SortKey,
        /// Limit number of rows printed.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// View a single task.
    View {
        id: u64,
    },

    /// Complete a task. Repeating tasks get their next occurrence.
    Complete {
        id: u64,
    },

    /// Change or clear a task's due time. Clears any sent reminder.
    Due {
        id: u64,
        /// New due time, same forms as `add --due`.
        when: Option<String>,
        /// Remove the due time instead.
        #[arg(long, conflicts_with = "when")]
        clear: bool,
    },

    /// Poll due reminders once, mark them sent, and print them.
    Remind {
        /// Evaluate as of this time instead of now.
        #[arg(long)]
        at: Option<String>,
    },

    /// Deliver reminders until interrupted, while notifications are permitted.
    Watch {
        /// Seconds between polls (overrides config).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Manage the notification permission.
    Permission {
        #[command(subcommand)]
        action: PermissionAction,
    },

    /// Show or create the config file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum PermissionAction {
    /// Show the current permission.
    Status,
    /// Ask to allow reminders (only prompts while undetermined).
    Request,
    /// Withdraw a previous answer.
    Revoke,
}

#[derive(Subcommand, Clone, Copy)]
pub enum ConfigAction {
    /// Print the effective settings and where they were read from.
    Show,
    /// Write the current settings to the config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Resolved settings and handles shared by every command.
pub struct Session {
    pub owner: String,
    pub tz: FixedOffset,
    pub poll_interval: Duration,
    pub data_dir: PathBuf,
    pub store: Arc<Store>,
}

impl Session {
    pub fn open(
        config: Config,
        db: Option<PathBuf>,
        owner: Option<String>,
        utc_offset: Option<String>,
    ) -> Result<Self> {
        let owner = owner.unwrap_or_else(|| config.owner.clone());
        if owner.trim().is_empty() {
            return Err(TaskError::Config("owner cannot be empty".into()));
        }
        let tz = match utc_offset {
            Some(s) => parse_utc_offset(&s)?,
            None => config.timezone()?,
        };
        let poll_interval = config.poll_interval()?;

        let data_dir = match &db {
            Some(path) => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            None => config.data_dir(),
        };
        std::fs::create_dir_all(&data_dir)?;
        let db_path = db.unwrap_or_else(|| data_dir.join("tasks.json"));
        let store = Arc::new(Store::open(&db_path)?);

        Ok(Session {
            owner,
            tz,
            poll_interval,
            data_dir,
            store,
        })
    }

    fn permission_path(&self) -> PathBuf {
        self.data_dir.join("permissions.json")
    }

    fn lifecycle(&self, clock: Arc<dyn Clock>) -> OccurrenceLifecycleManager {
        OccurrenceLifecycleManager::new(self.store.clone(), RecurrenceCalculator::new(self.tz), clock)
    }

    fn selector(&self) -> ReminderDueSelector {
        ReminderDueSelector::new(self.store.clone())
    }

    fn parse_due(&self, input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        parse_due_input(input, now, self.tz)
            .ok_or_else(|| TaskError::Validation(format!("could not understand due time {input:?}")))
    }
}

/// Execute one parsed command line.
///
/// Completions need nothing on disk and `config` needs only the config file;
/// every other command opens a session first.
pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_config_path);
    let load_config = || {
        Config::from_file(&config_path)
            .map_err(|e| TaskError::Config(format!("{}: {e}", config_path.display())))
    };
    let open_session = || -> Result<Session> {
        Session::open(load_config()?, cli.db, cli.owner, cli.utc_offset)
    };

    match cli.command {
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }

        Commands::Config { action } => cmd_config(&load_config()?, &config_path, action),

        Commands::Add { title, due, priority, repeat, remind, tags, subtasks } => {
            cmd_add(&open_session()?, title, due, priority, repeat, remind, tags, subtasks)
        }

        Commands::List { all, sort, limit } => cmd_list(&open_session()?, all, sort, limit),

        Commands::View { id } => cmd_view(&open_session()?, id),

        Commands::Complete { id } => cmd_complete(&open_session()?, id),

        Commands::Due { id, when, clear } => cmd_due(&open_session()?, id, when, clear),

        Commands::Remind { at } => cmd_remind(&open_session()?, at),

        Commands::Watch { interval } => cmd_watch(&open_session()?, interval).await,

        Commands::Permission { action } => cmd_permission(&open_session()?, action),
    }
}

/// Add a new task to the database.
pub fn cmd_add(
    session: &Session,
    title: String,
    due: Option<String>,
    priority: Priority,
    repeat: Option<RecurrencePattern>,
    remind: Option<u32>,
    tags: Vec<String>,
    subtasks: Vec<String>,
) -> Result<()> {
    let now = Utc::now();
    let mut draft = NewTask::new(session.owner.clone(), title, now);
    draft.due_at = due.as_deref().map(|s| session.parse_due(s, now)).transpose()?;
    draft.priority = priority;
    draft.reminder_offset = remind.map(ReminderOffset::from_minutes).transpose()?;
    draft.tags = split_and_normalise_tags(&tags);
    draft.subtasks = subtasks
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(Subtask::new)
        .collect();
    if let Some(pattern) = repeat {
        draft = draft.repeating(pattern);
    }

    let task = session.store.insert(draft)?;
    info!(task_id = task.id, "task added");
    println!("Added task {}", task.id);
    if task.reminder_offset.is_some() && task.due_at().is_none() {
        println!("Note: a reminder without a due time never fires.");
    }
    Ok(())
}

/// List tasks with optional sorting.
pub fn cmd_list(session: &Session, all: bool, sort: SortKey, limit: Option<usize>) -> Result<()> {
    let tasks = session.store.list(&session.owner)?;
    let mut rows: Vec<&Task> = tasks.iter().filter(|t| all || !t.completed).collect();
    match sort {
        SortKey::Due => rows.sort_by_key(|t| (t.due_at().is_none(), t.due_at(), t.id)),
        SortKey::Priority => rows.sort_by_key(|t| (t.priority, t.due_at().is_none(), t.due_at(), t.id)),
        SortKey::Id => rows.sort_by_key(|t| t.id),
    }
    if let Some(n) = limit {
        rows.truncate(n);
    }
    if rows.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    print_table(&rows, Utc::now(), session.tz);
    Ok(())
}

/// Show every field of a single task.
pub fn cmd_view(session: &Session, id: u64) -> Result<()> {
    let task = session
        .store
        .get(&session.owner, id)?
        .ok_or(TaskError::NotFound(id))?;
    let now = Utc::now();
    let local = |at: DateTime<Utc>| format_local(at, session.tz);
    let stamp = |ts: i64| {
        Utc.timestamp_opt(ts, 0)
            .single()
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "-".into())
    };

    println!("ID:           {}", task.id);
    println!("Title:        {}", task.title);
    println!("Status:       {}", if task.completed { "Done" } else { "Open" });
    println!("Priority:     {}", format_priority(task.priority));
    println!("Due:          {}", match task.due_at() { Some(d) => format!("{} ({})", local(d), format_due_relative(Some(d), now)), None => "-".into() });
    println!("Repeats:      {}", task.recurrence_pattern.map(|p| p.to_string()).unwrap_or_else(|| "-".into()));
    println!("Reminder:     {}", task.reminder_offset.map(|o| format!("{o} before")).unwrap_or_else(|| "-".into()));
    println!("Reminded at:  {}", task.last_notification_sent_at().map(local).unwrap_or_else(|| "-".into()));
    println!("Tags:         {}", if task.tags.is_empty() { "-".into() } else { task.tags.join(",") });
    println!("Previous:     {}", task.previous_occurrence.map(|p| p.to_string()).unwrap_or_else(|| "-".into()));
    println!("Created UTC:  {}", stamp(task.created_at_utc));
    println!("Updated UTC:  {}", stamp(task.updated_at_utc));
    if let Some(ts) = task.completed_at_utc {
        println!("Done UTC:     {}", stamp(ts));
    }
    if !task.subtasks.is_empty() {
        println!("Subtasks:");
        for s in &task.subtasks {
            println!("  [{}] {}", if s.completed { "x" } else { " " }, s.title);
        }
    }
    Ok(())
}

/// Complete a task and report any spawned occurrence.
pub fn cmd_complete(session: &Session, id: u64) -> Result<()> {
    let manager = session.lifecycle(Arc::new(SystemClock));
    let out = manager.complete(&session.owner, id)?;
    println!("Marked done: {}", out.completed_task.title);
    if let Some(next) = out.next_task {
        let due = next
            .due_at()
            .map(|d| format_local(d, session.tz))
            .unwrap_or_else(|| "-".into());
        println!("Next occurrence: task {} due {}", next.id, due);
    }
    Ok(())
}

/// Move or clear a task's due time.
pub fn cmd_due(session: &Session, id: u64, when: Option<String>, clear: bool) -> Result<()> {
    let mut task = session
        .store
        .get(&session.owner, id)?
        .ok_or(TaskError::NotFound(id))?;
    if task.completed {
        return Err(TaskError::Validation(format!("task {id} is already completed")));
    }
    let now = Utc::now();
    let due = match (when, clear) {
        (Some(s), _) => Some(session.parse_due(&s, now)?),
        (None, true) => None,
        (None, false) => {
            return Err(TaskError::Validation("give a new due time or --clear".into()));
        }
    };
    if task.is_recurring && due.is_none() {
        return Err(TaskError::MissingDueDateForRecurring { id });
    }

    task.set_due_at(due);
    task.updated_at_utc = now.timestamp();
    session.store.update(&task)?;
    match task.due_at() {
        Some(d) => println!("Task {} now due {}", id, format_local(d, session.tz)),
        None => println!("Task {} has no due time", id),
    }
    Ok(())
}

/// Poll-and-claim once: every returned reminder is already marked sent.
pub fn cmd_remind(session: &Session, at: Option<String>) -> Result<()> {
    let clock: Arc<dyn Clock> = match at {
        Some(s) => Arc::new(ManualClock::new(session.parse_due(&s, Utc::now())?)),
        None => Arc::new(SystemClock),
    };
    let now = clock.now();
    let claimed = session.selector().claim(&session.owner, now)?;
    if claimed.is_empty() {
        println!("No reminders due.");
        return Ok(());
    }
    for task in &claimed {
        let n = Notification::for_task(task, session.tz, now);
        println!("{:<5} {}: {}", n.task_id, n.title, n.body);
    }
    Ok(())
}

/// Run the gated dispatch loop until Ctrl-C.
pub async fn cmd_watch(session: &Session, interval: Option<u64>) -> Result<()> {
    let interval = match interval {
        Some(0) => return Err(TaskError::Config("--interval must be at least 1".into())),
        Some(secs) => Duration::from_secs(secs),
        None => session.poll_interval,
    };

    let provider = Arc::new(FilePermissionProvider::new(&session.permission_path()));
    let gate = Arc::new(PermissionGate::new(provider)?);
    if !gate.is_granted() {
        let hint = match gate.state() {
            PermissionState::Denied => {
                "Reminders are denied; run `tb permission revoke` then `tb permission request`."
            }
            _ => "Reminders are not enabled yet; run `tb permission request`.",
        };
        println!("{hint} Waiting...");
    }

    let dispatch = Arc::new(
        NotificationDispatchLoop::new(
            session.selector(),
            Arc::new(ConsoleSink),
            Arc::new(SystemClock),
            session.owner.clone(),
            session.tz,
        )
        .with_interval(interval),
    );

    println!(
        "Watching reminders for {} every {}s (Ctrl-C to stop)",
        session.owner,
        dispatch.interval().as_secs()
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        ctrl_c.cancel();
    });

    // Pick up permission changes made from another terminal.
    let refresher = {
        let gate = gate.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = gate.refresh() {
                            warn!(error = %e, "could not re-read notification permission");
                        }
                    }
                }
            }
        })
    };

    supervise(dispatch, gate.subscribe(), shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = refresher.await {
        warn!(error = %e, "permission refresher ended abnormally");
    }
    Ok(())
}

/// Show, request, or revoke the notification permission.
pub fn cmd_permission(session: &Session, action: PermissionAction) -> Result<()> {
    let provider = Arc::new(FilePermissionProvider::new(&session.permission_path()));
    match action {
        PermissionAction::Status => {
            let gate = PermissionGate::new(provider)?;
            println!("Notifications: {}", gate.state());
        }
        PermissionAction::Request => {
            let gate = PermissionGate::new(provider)?;
            let before = gate.state();
            let after = gate.request()?;
            if before != PermissionState::Undetermined {
                println!("Already decided: {after}. Use `tb permission revoke` to ask again.");
            } else {
                println!("Notifications: {after}");
            }
        }
        PermissionAction::Revoke => {
            provider.store(PermissionState::Undetermined)?;
            println!("Notifications: {}", PermissionState::Undetermined);
        }
    }
    Ok(())
}

/// Print or write the config file. Runs before a session is opened.
pub fn cmd_config(config: &Config, path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let rendered =
                toml::to_string_pretty(config).map_err(|e| TaskError::Config(e.to_string()))?;
            let source = if path.exists() { "" } else { " (not present, defaults shown)" };
            println!("# {}{}", path.display(), source);
            print!("{rendered}");
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(TaskError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            config.validate()?;
            config.save_to_file(path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

/// Generate shell completion scripts.
pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut std::io::stdout());
}
