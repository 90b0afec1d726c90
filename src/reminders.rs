//! Selecting tasks whose reminder should fire now.
//!
//! The selector keeps no state between calls. "Already notified" lives only on the
//! task (`last_notification_sent_at`), so it can be polled on any schedule, from any
//! process, as long as the caller writes the sent-marker back promptly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::db::TaskRepository;
use crate::error::Result;
use crate::task::Task;

/// True when `task` is incomplete, has a due date and an offset, its reminder
/// window has opened at `now`, and no reminder has been sent for this due date.
pub fn reminder_is_due(task: &Task, now: DateTime<Utc>) -> bool {
    if task.completed || task.last_notification_sent_at().is_some() {
        return false;
    }
    match task.reminder_opens_at() {
        Some(opens_at) => opens_at <= now,
        None => false,
    }
}

/// Finds due reminders for one owner.
#[derive(Clone)]
pub struct ReminderDueSelector {
    repo: Arc<dyn TaskRepository>,
}

impl ReminderDueSelector {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        ReminderDueSelector { repo }
    }

    /// Tasks whose reminder should fire at `now`, earliest due first.
    pub fn due_reminders(&self, owner: &str, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut due: Vec<Task> = self
            .repo
            .list(owner)?
            .into_iter()
            .filter(|t| reminder_is_due(t, now))
            .collect();
        due.sort_by_key(|t| (t.due_at(), t.id));
        Ok(due)
    }

    /// Select due reminders and write each sent-marker before returning them.
    ///
    /// A task whose marker could not be written is left out and stays eligible
    /// for the next call.
    pub fn claim(&self, owner: &str, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let mut claimed = Vec::new();
        for mut task in self.due_reminders(owner, now)? {
            let Some(due) = task.due_at() else {
                continue;
            };
            match self.repo.mark_notified(owner, task.id, due, now) {
                Ok(true) => {
                    task.mark_notified(now);
                    claimed.push(task);
                }
                Ok(false) => debug!(task_id = task.id, "task changed before its reminder was claimed"),
                Err(e) => warn!(task_id = task.id, error = %e, "failed to record reminder as sent"),
            }
        }
        Ok(claimed)
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }
}
