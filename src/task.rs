//! Task data structure and related functionality.
//!
//! This module defines the core `Task` struct that represents one occurrence of a
//! (possibly repeating) work item, with its due date, recurrence, and reminder state.
//! `NewTask` is the validated shape accepted when a task is created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};
use crate::fields::*;

/// Upper bound on title length, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// An ordered checklist item attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

impl Subtask {
    pub fn new(title: impl Into<String>) -> Self {
        Subtask {
            title: title.into(),
            completed: false,
        }
    }
}

/// One occurrence of a task, owned by exactly one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(rename = "reminder_offset_minutes")]
    pub reminder_offset: Option<ReminderOffset>,
    last_notification_sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Occurrence this one was spawned from, if any.
    #[serde(default)]
    pub previous_occurrence: Option<u64>,
    pub created_at_utc: i64,
    pub updated_at_utc: i64,
    #[serde(default)]
    pub completed_at_utc: Option<i64>,
}

impl Task {
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_at
    }

    pub fn last_notification_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_notification_sent_at
    }

    /// Change the due date. A changed due date always drops the sent-marker,
    /// which only ever describes the due date it was written against.
    pub fn set_due_at(&mut self, due_at: Option<DateTime<Utc>>) {
        if self.due_at != due_at {
            self.due_at = due_at;
            self.last_notification_sent_at = None;
        }
    }

    /// Record that a reminder was dispatched for the current due date.
    ///
    /// Returns `false` (and leaves the task untouched) when the task is completed
    /// or has no due date.
    pub fn mark_notified(&mut self, at: DateTime<Utc>) -> bool {
        if self.completed || self.due_at.is_none() {
            return false;
        }
        self.last_notification_sent_at = Some(at);
        self.updated_at_utc = at.timestamp();
        true
    }

    /// Instant at which the reminder window opens, if the task has both a due date and an offset.
    pub fn reminder_opens_at(&self) -> Option<DateTime<Utc>> {
        let due = self.due_at?;
        let offset = self.reminder_offset?;
        due.checked_sub_signed(offset.as_duration())
    }

    /// Build the next occurrence of this task, due at `next_due`.
    ///
    /// Title, priority, recurrence, reminder offset, and tag identities carry over;
    /// subtasks are copied fresh with every item reopened.
    pub fn next_occurrence(&self, next_due: DateTime<Utc>, now: DateTime<Utc>) -> NewTask {
        NewTask {
            owner: self.owner.clone(),
            title: self.title.clone(),
            due_at: Some(next_due),
            priority: self.priority,
            is_recurring: self.is_recurring,
            recurrence_pattern: self.recurrence_pattern,
            reminder_offset: self.reminder_offset,
            tags: self.tags.clone(),
            subtasks: self
                .subtasks
                .iter()
                .map(|s| Subtask::new(s.title.clone()))
                .collect(),
            previous_occurrence: Some(self.id),
            created_at: now,
        }
    }
}

/// A task that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub owner: String,
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    pub reminder_offset: Option<ReminderOffset>,
    pub tags: Vec<String>,
    pub subtasks: Vec<Subtask>,
    pub previous_occurrence: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl NewTask {
    pub fn new(owner: impl Into<String>, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        NewTask {
            owner: owner.into(),
            title: title.into(),
            due_at: None,
            priority: Priority::default(),
            is_recurring: false,
            recurrence_pattern: None,
            reminder_offset: None,
            tags: Vec::new(),
            subtasks: Vec::new(),
            previous_occurrence: None,
            created_at,
        }
    }

    /// Make this a repeating task.
    pub fn repeating(mut self, pattern: RecurrencePattern) -> Self {
        self.is_recurring = true;
        self.recurrence_pattern = Some(pattern);
        self
    }

    /// Reject drafts that break the task invariants.
    pub fn validate(&self, id: u64) -> Result<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(TaskError::Validation("title cannot be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(TaskError::Validation(format!(
                "title is longer than {MAX_TITLE_LEN} characters"
            )));
        }
        if self.owner.trim().is_empty() {
            return Err(TaskError::Validation("owner cannot be empty".into()));
        }
        match (self.is_recurring, self.recurrence_pattern) {
            (true, None) => {
                return Err(TaskError::InvalidPattern(
                    "recurring task has no recurrence pattern".into(),
                ))
            }
            (false, Some(p)) => {
                return Err(TaskError::Validation(format!(
                    "recurrence pattern {p} given for a task that does not repeat"
                )))
            }
            _ => {}
        }
        if self.is_recurring && self.due_at.is_none() {
            return Err(TaskError::MissingDueDateForRecurring { id });
        }
        Ok(())
    }

    /// Turn the draft into a stored task with the given id.
    pub fn into_task(self, id: u64) -> Task {
        let ts = self.created_at.timestamp();
        Task {
            id,
            owner: self.owner,
            title: self.title.trim().to_string(),
            completed: false,
            due_at: self.due_at,
            priority: self.priority,
            is_recurring: self.is_recurring,
            recurrence_pattern: self.recurrence_pattern,
            reminder_offset: self.reminder_offset,
            last_notification_sent_at: None,
            tags: self.tags,
            subtasks: self.subtasks,
            previous_occurrence: self.previous_occurrence,
            created_at_utc: ts,
            updated_at_utc: ts,
            completed_at_utc: None,
        }
    }
}
