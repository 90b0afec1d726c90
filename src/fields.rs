//! Enumerations and field types for tasks.
//!
//! This module defines the structured values carried on a task: priority,
//! recurrence pattern, and the reminder offset.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Priority classification for task importance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// How the next occurrence of a repeating task is derived from the current one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Monthly => "monthly",
            RecurrencePattern::Yearly => "yearly",
        })
    }
}

impl FromStr for RecurrencePattern {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(RecurrencePattern::Daily),
            "weekly" => Ok(RecurrencePattern::Weekly),
            "monthly" => Ok(RecurrencePattern::Monthly),
            "yearly" => Ok(RecurrencePattern::Yearly),
            other => Err(TaskError::InvalidPattern(format!(
                "expected one of daily|weekly|monthly|yearly (got {other:?})"
            ))),
        }
    }
}

/// Minutes before the due time at which a reminder should fire.
///
/// Always at least one minute. Stored as a plain minute count so the persisted
/// field stays `reminder_offset_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ReminderOffset(u32);

impl ReminderOffset {
    pub fn from_minutes(minutes: u32) -> Result<Self, TaskError> {
        if minutes == 0 {
            return Err(TaskError::Validation(
                "reminder offset must be at least one minute".into(),
            ));
        }
        Ok(ReminderOffset(minutes))
    }

    pub fn minutes(self) -> u32 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::minutes(i64::from(self.0))
    }
}

impl TryFrom<u32> for ReminderOffset {
    type Error = TaskError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        ReminderOffset::from_minutes(value)
    }
}

impl From<ReminderOffset> for u32 {
    fn from(value: ReminderOffset) -> Self {
        value.0
    }
}

impl fmt::Display for ReminderOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.minutes();
        if m % 1440 == 0 {
            write!(f, "{}d", m / 1440)
        } else if m % 60 == 0 {
            write!(f, "{}h", m / 60)
        } else {
            write!(f, "{}m", m)
        }
    }
}

/// Available sorting options for task lists.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortKey {
    Due,
    Priority,
    Id,
}
