//! Error types for the task and reminder core.

/// Errors raised by the recurrence, completion, and reminder subsystems.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Recurrence pattern missing or not one of daily|weekly|monthly|yearly.
    #[error("invalid recurrence pattern: {0}")]
    InvalidPattern(String),

    /// A recurring task has no due date to advance from.
    #[error("task {id} is recurring but has no due date")]
    MissingDueDateForRecurring { id: u64 },

    /// Task missing or owned by another account.
    #[error("task {0} not found")]
    NotFound(u64),

    /// Input rejected at the creation/update boundary.
    #[error("validation error: {0}")]
    Validation(String),

    /// Notification sink rejected the reminder.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Storage write failed; the in-memory state was rolled back.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskError {
    /// Whether the failed reminder stays eligible and should be tried again on the next poll.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::Delivery(_) | TaskError::Persistence(_) | TaskError::Io(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_and_persistence_are_retryable() {
        assert!(TaskError::Delivery("sink closed".into()).is_retryable());
        assert!(TaskError::Persistence("disk full".into()).is_retryable());
        assert!(!TaskError::NotFound(3).is_retryable());
        assert!(!TaskError::InvalidPattern("hourly".into()).is_retryable());
    }

    #[test]
    fn messages_name_the_task() {
        let err = TaskError::MissingDueDateForRecurring { id: 12 };
        assert_eq!(err.to_string(), "task 12 is recurring but has no due date");
        assert_eq!(TaskError::NotFound(4).to_string(), "task 4 not found");
    }
}
