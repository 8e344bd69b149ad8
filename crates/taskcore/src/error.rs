use thiserror::Error;

use crate::task::AbortScope;

/// Infrastructure-level failure: anything that escapes the structured
/// task outcome. A driver that hits one of these stops and leaves its
/// workflow `pending` for recovery.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Task runner '{task}' failed: {source}")]
    Runner {
        task: String,
        #[source]
        source: RunnerError,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Workflow has {0} tasks, at most {max} are supported", max = u32::MAX)]
    TooManyTasks(usize),
}

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Raised by a task runner instead of returning an outcome.
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    #[error("Invalid task input: {0}")]
    InvalidInput(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        RunnerError::Serialization(err.to_string())
    }
}

/// Error reported through a task outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task deliberately declined. Logged at info, never retried, and
    /// fails only its own task; `abort` is the scope the runner reported,
    /// kept for diagnostics. Use an explicit outcome abort to fail the
    /// workflow.
    #[error("{message}")]
    Expected { message: String, abort: AbortScope },

    #[error("{0}")]
    Unexpected(String),
}

impl TaskError {
    pub fn expected(message: impl Into<String>) -> Self {
        TaskError::Expected {
            message: message.into(),
            abort: AbortScope::Task,
        }
    }

    pub fn expected_with_scope(message: impl Into<String>, abort: AbortScope) -> Self {
        TaskError::Expected {
            message: message.into(),
            abort,
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        TaskError::Unexpected(message.into())
    }

    pub fn is_expected(&self) -> bool {
        matches!(self, TaskError::Expected { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            TaskError::Expected { message, .. } => message,
            TaskError::Unexpected(message) => message,
        }
    }
}
