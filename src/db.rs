//! Task storage and utility functions.
//!
//! This module provides the `Database` document that holds every task, the
//! `TaskRepository` contract consumed by the completion and reminder paths, and
//! `Store`, its in-memory or JSON-file-backed implementation. It also carries the
//! parsing and formatting helpers the CLI uses for due times and tags.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TaskError};
use crate::fields::*;
use crate::task::{NewTask, Task};

/// Time of day used when a due date is given without one.
const DEFAULT_DUE_TIME: (u32, u32) = (9, 0);

/// Storage operations the completion and reminder paths rely on.
///
/// Every lookup is scoped to an owner; a task owned by someone else behaves
/// exactly like a missing one.
pub trait TaskRepository: Send + Sync {
    fn get(&self, owner: &str, id: u64) -> Result<Option<Task>>;

    fn list(&self, owner: &str) -> Result<Vec<Task>>;

    /// Validate and store a new task, returning it with its assigned id.
    fn insert(&self, draft: NewTask) -> Result<Task>;

    /// Replace a stored task. Completed tasks cannot be reopened.
    fn update(&self, task: &Task) -> Result<()>;

    /// Store a completed task and, optionally, its next occurrence as one unit.
    /// Either both writes land or neither does.
    fn complete_and_spawn(&self, completed: &Task, next: Option<NewTask>) -> Result<Option<Task>>;

    /// Set the sent-marker, but only if the task is still incomplete and still
    /// due at `expected_due`. Returns whether the marker was written.
    fn mark_notified(
        &self,
        owner: &str,
        id: u64,
        expected_due: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// In-memory document holding every task.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Database {
    pub tasks: Vec<Task>,
}

impl Database {
    /// Load database from JSON file, returning an empty database if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Database::default());
        }
        let mut buf = String::new();
        File::open(path)?.read_to_string(&mut buf)?;
        if buf.trim().is_empty() {
            return Ok(Database::default());
        }
        Ok(serde_json::from_str(&buf)?)
    }

    /// Save database to JSON file using atomic write (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let mut f = File::create(&tmp)?;
        let data = serde_json::to_string_pretty(self)?;
        f.write_all(data.as_bytes())?;
        f.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    /// Generate the next available task ID.
    pub fn next_id(&self) -> u64 {
        self.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }

    /// Get a task by ID, scoped to an owner.
    pub fn get(&self, owner: &str, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id && t.owner == owner)
    }

    /// Get a mutable reference to a task by ID, scoped to an owner.
    pub fn get_mut(&mut self, owner: &str, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id && t.owner == owner)
    }

    fn push_new(&mut self, draft: NewTask) -> Result<Task> {
        let id = self.next_id();
        draft.validate(id)?;
        let task = draft.into_task(id);
        self.tasks.push(task.clone());
        Ok(task)
    }
}

/// `TaskRepository` over a `Database`, optionally persisted to a JSON file.
#[derive(Debug)]
pub struct Store {
    path: Option<PathBuf>,
    db: Mutex<Database>,
}

impl Store {
    /// A store that never touches the filesystem.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Store {
            path: None,
            db: Mutex::new(Database::default()),
        }
    }

    /// Open (or lazily create) the JSON store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::load(path)?;
        debug!(path = %path.display(), tasks = db.tasks.len(), "task store opened");
        Ok(Store {
            path: Some(path.to_path_buf()),
            db: Mutex::new(db),
        })
    }

    /// Pick up writes made by other processes since the last operation.
    fn reload(&self, db: &mut Database) -> Result<()> {
        if let Some(path) = &self.path {
            *db = Database::load(path)?;
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Database) -> T) -> Result<T> {
        let mut guard = self.db.lock().unwrap_or_else(|e| e.into_inner());
        self.reload(&mut guard)?;
        Ok(f(&*guard))
    }

    /// Apply `f` and persist. If `f` or the save fails, the in-memory state is restored.
    fn write<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut guard = self.db.lock().unwrap_or_else(|e| e.into_inner());
        self.reload(&mut guard)?;
        let snapshot = guard.clone();
        let out = match f(&mut *guard) {
            Ok(out) => out,
            Err(e) => {
                *guard = snapshot;
                return Err(e);
            }
        };
        if let Some(path) = &self.path {
            if let Err(e) = guard.save(path) {
                warn!(path = %path.display(), error = %e, "task store save failed, rolling back");
                *guard = snapshot;
                return Err(TaskError::Persistence(e.to_string()));
            }
        }
        Ok(out)
    }
}

impl TaskRepository for Store {
    fn get(&self, owner: &str, id: u64) -> Result<Option<Task>> {
        self.read(|db| db.get(owner, id).cloned())
    }

    fn list(&self, owner: &str) -> Result<Vec<Task>> {
        self.read(|db| db.tasks.iter().filter(|t| t.owner == owner).cloned().collect())
    }

    fn insert(&self, draft: NewTask) -> Result<Task> {
        self.write(|db| db.push_new(draft))
    }

    fn update(&self, task: &Task) -> Result<()> {
        self.write(|db| {
            let stored = db
                .get_mut(&task.owner, task.id)
                .ok_or(TaskError::NotFound(task.id))?;
            if stored.completed && !task.completed {
                return Err(TaskError::Validation(format!(
                    "task {} is completed and cannot be reopened",
                    task.id
                )));
            }
            *stored = task.clone();
            Ok(())
        })
    }

    fn complete_and_spawn(&self, completed: &Task, next: Option<NewTask>) -> Result<Option<Task>> {
        self.write(|db| {
            let stored = db
                .get_mut(&completed.owner, completed.id)
                .ok_or(TaskError::NotFound(completed.id))?;
            if stored.completed {
                // Completed elsewhere since it was read; that completion already spawned.
                debug!(task_id = completed.id, "task already completed, nothing to spawn");
                return Ok(None);
            }
            *stored = completed.clone();
            next.map(|draft| db.push_new(draft)).transpose()
        })
    }

    fn mark_notified(
        &self,
        owner: &str,
        id: u64,
        expected_due: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.write(|db| {
            let task = db.get_mut(owner, id).ok_or(TaskError::NotFound(id))?;
            if task.due_at() != Some(expected_due) {
                return Ok(false);
            }
            Ok(task.mark_notified(at))
        })
    }
}

/// Normalize a tag string by trimming, lowercasing, and replacing spaces with hyphens.
pub fn normalise_tag(s: &str) -> String {
    s.trim().to_lowercase().replace(' ', "-")
}

/// Split comma-separated tag strings and normalize each tag.
pub fn split_and_normalise_tags(inputs: &[String]) -> Vec<String> {
    let mut tags = Vec::new();
    for raw in inputs {
        for part in raw.split(',') {
            let tag = normalise_tag(part);
            if !tag.is_empty() {
                tags.push(tag);
            }
        }
    }
    tags.sort();
    tags.dedup();
    tags
}

/// Parse human-readable due input into an instant, reading wall-clock values in `tz`.
///
/// Supports:
/// - "YYYY-MM-DD HH:MM", "YYYY-MM-DDTHH:MM", "YYYY-MM-DD" (09:00)
/// - "today", "tomorrow", "monday".."sunday", "next friday", "end of month",
///   each optionally followed by "HH:MM"
/// - "in 30m", "in 2h", "in 3d", "in 1w" (relative to `now`)
pub fn parse_due_input(s: &str, now: DateTime<Utc>, tz: FixedOffset) -> Option<DateTime<Utc>> {
    // Absolute forms are matched before lowercasing; chrono wants the literal 'T'.
    let raw = s.trim();
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return local_to_utc(naive, tz);
        }
    }

    let s = raw.to_lowercase();
    if let Some(rest) = s.strip_prefix("in ") {
        return parse_relative(rest.trim()).and_then(|d| now.checked_add_signed(d));
    }

    // Split an optional trailing "HH:MM".
    let (day_part, time) = match s.rsplit_once(' ') {
        Some((head, tail)) => match NaiveTime::parse_from_str(tail, "%H:%M") {
            Ok(t) => (head.trim().to_string(), Some(t)),
            Err(_) => (s.clone(), None),
        },
        None => (s.clone(), None),
    };
    let time = match time {
        Some(t) => t,
        None => NaiveTime::from_hms_opt(DEFAULT_DUE_TIME.0, DEFAULT_DUE_TIME.1, 0)?,
    };

    let today = now.with_timezone(&tz).date_naive();
    let date = parse_day(&day_part, today)?;
    local_to_utc(date.and_time(time), tz)
}

fn parse_relative(rest: &str) -> Option<Duration> {
    let unit = rest.chars().last()?;
    let n: i64 = rest[..rest.len() - unit.len_utf8()].trim().parse().ok()?;
    match unit {
        'm' => Duration::try_minutes(n),
        'h' => Duration::try_hours(n),
        'd' => Duration::try_days(n),
        'w' => Duration::try_weeks(n),
        _ => None,
    }
}

fn parse_day(s: &str, today: NaiveDate) -> Option<NaiveDate> {
    match s {
        "today" => return Some(today),
        "tomorrow" => return Some(today + Duration::days(1)),
        "end of month" | "eom" => {
            let (year, month) = if today.month() == 12 {
                (today.year() + 1, 1)
            } else {
                (today.year(), today.month() + 1)
            };
            return NaiveDate::from_ymd_opt(year, month, 1).map(|d| d - Duration::days(1));
        }
        _ => {}
    }

    let weekdays = [
        ("monday", 0), ("tuesday", 1), ("wednesday", 2), ("thursday", 3),
        ("friday", 4), ("saturday", 5), ("sunday", 6),
        ("mon", 0), ("tue", 1), ("wed", 2), ("thu", 3),
        ("fri", 4), ("sat", 5), ("sun", 6),
    ];
    let current_day = today.weekday().num_days_from_monday() as i64;
    for (day_name, target_day) in weekdays {
        let days_ahead = (target_day + 7 - current_day) % 7;
        if s == day_name || s == format!("this {}", day_name) {
            return Some(today + Duration::days(days_ahead));
        }
        if s == format!("next {}", day_name) {
            let days_to_add = if days_ahead == 0 { 7 } else { days_ahead + 7 };
            return Some(today + Duration::days(days_to_add));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn local_to_utc(naive: NaiveDateTime, tz: FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Render an instant as local wall-clock time.
pub fn format_local(at: DateTime<Utc>, tz: FixedOffset) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

/// Format a due time relative to now ("in 45m", "in 3h", "in 2d", "5h late").
pub fn format_due_relative(due: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(due) = due else {
        return "-".into();
    };
    let delta = due - now;
    let (amount, late) = if delta < Duration::zero() {
        (-delta, true)
    } else {
        (delta, false)
    };
    let span = if amount < Duration::hours(1) {
        format!("{}m", amount.num_minutes())
    } else if amount < Duration::days(1) {
        format!("{}h", amount.num_hours())
    } else {
        format!("{}d", amount.num_days())
    };
    if late {
        format!("{span} late")
    } else {
        format!("in {span}")
    }
}

/// Format a priority level for display.
pub fn format_priority(p: Priority) -> &'static str {
    match p {
        Priority::High => "High",
        Priority::Medium => "Med",
        Priority::Low => "Low",
    }
}

/// Print tasks in a formatted table.
pub fn print_table(tasks: &[&Task], now: DateTime<Utc>, tz: FixedOffset) {
    println!(
        "{:<5} {:<4} {:<17} {:<10} {:<8} {:<7} {}",
        "ID", "Pri", "Due", "When", "Repeat", "Remind", "Title [tags]"
    );
    for t in tasks {
        let tags = if t.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", t.tags.join(","))
        };
        let due = t.due_at().map(|d| format_local(d, tz)).unwrap_or_else(|| "-".into());
        let repeat = t
            .recurrence_pattern
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        let remind = match (t.reminder_offset, t.last_notification_sent_at()) {
            (Some(_), Some(_)) => "sent".to_string(),
            (Some(o), None) => o.to_string(),
            (None, _) => "-".to_string(),
        };
        let done = if t.completed { "x " } else { "" };
        println!(
            "{:<5} {:<4} {:<17} {:<10} {:<8} {:<7} {}{}{}",
            t.id,
            format_priority(t.priority),
            due,
            format_due_relative(t.due_at(), now),
            repeat,
            remind,
            done,
            truncate(&t.title, 60),
            tags
        );
    }
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out = String::new();
        for (i, ch) in s.chars().enumerate() {
            if i + 1 >= width {
                out.push('…');
                break;
            }
            out.push(ch);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Subtask;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn draft(owner: &str, title: &str) -> NewTask {
        NewTask::new(owner, title, at(2026, 2, 1, 8, 0))
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let store = Store::in_memory();
        let a = store.insert(draft("alice", "one")).unwrap();
        let b = store.insert(draft("alice", "two")).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
    }

    #[test]
    fn insert_rejects_invalid_drafts() {
        let store = Store::in_memory();
        let bad = draft("alice", "rent").repeating(RecurrencePattern::Monthly);
        assert!(matches!(
            store.insert(bad),
            Err(TaskError::MissingDueDateForRecurring { .. })
        ));
        assert!(store.list("alice").unwrap().is_empty());
    }

    #[test]
    fn lookups_are_owner_scoped() {
        let store = Store::in_memory();
        let task = store.insert(draft("alice", "secret")).unwrap();
        assert!(store.get("bob", task.id).unwrap().is_none());
        assert!(store.list("bob").unwrap().is_empty());
        let mut foreign = task.clone();
        foreign.owner = "bob".into();
        assert!(matches!(store.update(&foreign), Err(TaskError::NotFound(_))));
    }

    #[test]
    fn completed_tasks_cannot_be_reopened() {
        let store = Store::in_memory();
        let mut task = store.insert(draft("alice", "done")).unwrap();
        task.completed = true;
        store.update(&task).unwrap();
        task.completed = false;
        assert!(matches!(store.update(&task), Err(TaskError::Validation(_))));
        assert!(store.get("alice", task.id).unwrap().unwrap().completed);
    }

    #[test]
    fn complete_and_spawn_rolls_back_on_invalid_spawn() {
        let store = Store::in_memory();
        let mut task = store.insert(draft("alice", "plants")).unwrap();
        task.completed = true;
        let bad_next = draft("alice", "  ");
        assert!(store.complete_and_spawn(&task, Some(bad_next)).is_err());
        let stored = store.get("alice", task.id).unwrap().unwrap();
        assert!(!stored.completed, "completion must not land without its spawn");
        assert_eq!(store.list("alice").unwrap().len(), 1);
    }

    #[test]
    fn mark_notified_checks_due_and_completion() {
        let store = Store::in_memory();
        let mut d = draft("alice", "call");
        d.due_at = Some(at(2026, 2, 13, 9, 0));
        let task = store.insert(d).unwrap();

        let stale = at(2026, 2, 14, 9, 0);
        assert!(!store.mark_notified("alice", task.id, stale, at(2026, 2, 12, 9, 0)).unwrap());

        let due = task.due_at().unwrap();
        assert!(store.mark_notified("alice", task.id, due, at(2026, 2, 12, 9, 0)).unwrap());
        let stored = store.get("alice", task.id).unwrap().unwrap();
        assert_eq!(stored.last_notification_sent_at(), Some(at(2026, 2, 12, 9, 0)));

        assert!(matches!(
            store.mark_notified("alice", 99, due, at(2026, 2, 12, 9, 0)),
            Err(TaskError::NotFound(99))
        ));
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        {
            let store = Store::open(&path).unwrap();
            let mut d = draft("alice", "dentist");
            d.due_at = Some(at(2026, 3, 2, 14, 30));
            d.subtasks = vec![Subtask::new("insurance card")];
            store.insert(d).unwrap();
        }
        let reopened = Store::open(&path).unwrap();
        let tasks = reopened.list("alice").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].due_at(), Some(at(2026, 3, 2, 14, 30)));
        assert_eq!(tasks[0].subtasks[0].title, "insurance card");
    }

    #[test]
    fn file_store_sees_writes_from_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let watcher = Store::open(&path).unwrap();
        let other = Store::open(&path).unwrap();
        other.insert(draft("alice", "added elsewhere")).unwrap();
        assert_eq!(watcher.list("alice").unwrap().len(), 1);
        watcher.insert(draft("alice", "added here")).unwrap();
        assert_eq!(other.list("alice").unwrap().len(), 2);
    }

    #[test]
    fn stale_completion_does_not_spawn_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let first = Store::open(&path).unwrap();
        let second = Store::open(&path).unwrap();
        let mut d = draft("alice", "bins").repeating(RecurrencePattern::Weekly);
        d.due_at = Some(at(2026, 2, 13, 7, 0));
        let task = first.insert(d).unwrap();

        // Both handles read the task while it was still open.
        let stale = first.get("alice", task.id).unwrap().unwrap();
        let mut done = second.get("alice", task.id).unwrap().unwrap();
        done.completed = true;
        let next = done.next_occurrence(at(2026, 2, 20, 7, 0), at(2026, 2, 13, 8, 0));
        assert!(second.complete_and_spawn(&done, Some(next)).unwrap().is_some());

        let mut late = stale;
        late.completed = true;
        let again = late.next_occurrence(at(2026, 2, 20, 7, 0), at(2026, 2, 13, 8, 5));
        assert!(first.complete_and_spawn(&late, Some(again)).unwrap().is_none());
        assert_eq!(first.list("alice").unwrap().len(), 2);
    }

    #[test]
    fn failed_save_rolls_back_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("tasks.json");
        let store = Store::open(&path).unwrap();
        let err = store.insert(draft("alice", "lost")).unwrap_err();
        assert!(matches!(err, TaskError::Persistence(_)));
        assert!(store.list("alice").unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Store::open(&path), Err(TaskError::Json(_))));
    }

    #[test]
    fn parse_due_input_absolute_forms() {
        let now = at(2026, 2, 11, 12, 0);
        let tz = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(parse_due_input("2026-02-13 09:00", now, tz), Some(at(2026, 2, 13, 8, 0)));
        assert_eq!(parse_due_input("2026-02-13T09:00", now, tz), Some(at(2026, 2, 13, 8, 0)));
        assert_eq!(parse_due_input(" 2026-02-13T09:00:00 ", now, tz), Some(at(2026, 2, 13, 8, 0)));
        assert_eq!(parse_due_input("2026-02-13", now, tz), Some(at(2026, 2, 13, 8, 0)));
        assert_eq!(parse_due_input("nonsense", now, tz), None);
    }

    #[test]
    fn parse_due_input_keywords() {
        // 2026-02-11 is a Wednesday.
        let now = at(2026, 2, 11, 12, 0);
        assert_eq!(parse_due_input("today 17:30", now, utc()), Some(at(2026, 2, 11, 17, 30)));
        assert_eq!(parse_due_input("tomorrow", now, utc()), Some(at(2026, 2, 12, 9, 0)));
        assert_eq!(parse_due_input("friday 08:00", now, utc()), Some(at(2026, 2, 13, 8, 0)));
        assert_eq!(parse_due_input("next wed", now, utc()), Some(at(2026, 2, 18, 9, 0)));
        assert_eq!(parse_due_input("eom", now, utc()), Some(at(2026, 2, 28, 9, 0)));
    }

    #[test]
    fn parse_due_input_relative() {
        let now = at(2026, 2, 11, 12, 0);
        assert_eq!(parse_due_input("in 30m", now, utc()), Some(at(2026, 2, 11, 12, 30)));
        assert_eq!(parse_due_input("in 2h", now, utc()), Some(at(2026, 2, 11, 14, 0)));
        assert_eq!(parse_due_input("in 1w", now, utc()), Some(at(2026, 2, 18, 12, 0)));
        assert_eq!(parse_due_input("in x", now, utc()), None);
    }

    #[test]
    fn parse_due_input_rejects_huge_offsets() {
        let now = at(2026, 2, 11, 12, 0);
        assert_eq!(parse_due_input("in 100000000d", now, utc()), None);
        assert_eq!(parse_due_input("in 9999999999999w", now, utc()), None);
        assert_eq!(parse_due_input("in 9223372036854775807m", now, utc()), None);
    }

    #[test]
    fn format_due_relative_spans() {
        let now = at(2026, 2, 11, 12, 0);
        assert_eq!(format_due_relative(None, now), "-");
        assert_eq!(format_due_relative(Some(at(2026, 2, 11, 12, 45)), now), "in 45m");
        assert_eq!(format_due_relative(Some(at(2026, 2, 11, 15, 0)), now), "in 3h");
        assert_eq!(format_due_relative(Some(at(2026, 2, 13, 12, 0)), now), "in 2d");
        assert_eq!(format_due_relative(Some(at(2026, 2, 11, 7, 0)), now), "5h late");
    }

    #[test]
    fn tags_are_normalised() {
        let tags = split_and_normalise_tags(&["Home, garden".into(), "home".into()]);
        assert_eq!(tags, vec!["garden".to_string(), "home".to_string()]);
    }
}
