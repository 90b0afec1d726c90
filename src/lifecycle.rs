//! Completing tasks and spawning the next occurrence of repeating ones.
//!
//! A task goes `ACTIVE -> COMPLETED` exactly once. Repeating tasks never cycle in
//! place: completing one stores the finished record and creates a fresh, active
//! record for the next due date in the same repository write.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::db::TaskRepository;
use crate::error::{Result, TaskError};
use crate::recurrence::RecurrenceCalculator;
use crate::task::Task;

/// Outcome of a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub completed_task: Task,
    pub next_task: Option<Task>,
}

/// Orchestrates completion of a single occurrence.
pub struct OccurrenceLifecycleManager {
    repo: Arc<dyn TaskRepository>,
    calculator: RecurrenceCalculator,
    clock: Arc<dyn Clock>,
}

impl OccurrenceLifecycleManager {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        calculator: RecurrenceCalculator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        OccurrenceLifecycleManager {
            repo,
            calculator,
            clock,
        }
    }

    /// Complete task `id` on behalf of `owner`.
    ///
    /// Completing an already-completed task returns it unchanged with no spawn.
    /// A recurring task without a due date is completed but not advanced.
    pub fn complete(&self, owner: &str, id: u64) -> Result<Completion> {
        let current = self.repo.get(owner, id)?.ok_or(TaskError::NotFound(id))?;

        if current.completed {
            return Ok(Completion {
                completed_task: current,
                next_task: None,
            });
        }

        let now = self.clock.now();
        let next_draft = match (current.is_recurring, current.due_at()) {
            (true, Some(due)) => {
                let next_due = self
                    .calculator
                    .next_due_at(due, current.recurrence_pattern)?;
                Some(current.next_occurrence(next_due, now))
            }
            (true, None) => {
                warn!(
                    task_id = id,
                    error = %TaskError::MissingDueDateForRecurring { id },
                    "recurring task completed without a due date, not spawning"
                );
                None
            }
            (false, _) => None,
        };

        let mut done = current;
        done.completed = true;
        done.completed_at_utc = Some(now.timestamp());
        done.updated_at_utc = now.timestamp();

        let next_task = self.repo.complete_and_spawn(&done, next_draft)?;
        match &next_task {
            Some(next) => info!(
                task_id = id,
                next_id = next.id,
                next_due = ?next.due_at(),
                "task completed, next occurrence created"
            ),
            None => info!(task_id = id, "task completed"),
        }

        Ok(Completion {
            completed_task: done,
            next_task,
        })
    }
}
