use crate::{RunnerError, TaskError, WorkflowId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Value produced by [`TaskRunner::prepare`], shared by every execution of
/// that task name within one driver run. Never persisted.
pub type PreparedData = Arc<dyn Any + Send + Sync>;

/// How far a task failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortScope {
    /// Fail this task, continue with the next one.
    Task,
    /// Fail this task and the whole workflow.
    Workflow,
}

/// Core trait that all task runners implement.
///
/// Runners are registered once and shared by every workflow, so they must
/// not keep per-call mutable state.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Registry key (e.g., "debug.log", "billing.charge")
    fn name(&self) -> &str;

    /// Run one attempt of the task.
    ///
    /// Task-level failures go in the returned [`TaskOutcome`]. An `Err` means
    /// the runner could not produce an outcome at all; the driver stops and
    /// the workflow stays pending until recovery.
    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutcome, RunnerError>;

    /// Optional: build a value shared by all executions of this task name
    /// in the current driver run (a token, a client...).
    ///
    /// Failures are logged by the driver and treated as "no value".
    async fn prepare(&self, _ctx: TaskContext) -> Result<Option<PreparedData>, RunnerError> {
        Ok(None)
    }
}

/// Execution context passed to each task runner call
#[derive(Clone)]
pub struct TaskContext {
    pub workflow_id: WorkflowId,

    /// Position of the task in its workflow, starting at 0
    pub seq: u32,

    /// Number of automatic retries of this task in the current run
    pub attempt: u32,

    /// JSON-encoded task input, as submitted
    pub data: Option<String>,

    /// Value returned by `prepare`, if any
    pub prepared: Option<PreparedData>,
}

impl TaskContext {
    pub fn new(workflow_id: impl Into<WorkflowId>, seq: u32) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            seq,
            attempt: 0,
            data: None,
            prepared: None,
        }
    }

    /// Decode the task input, `None` when the task was submitted without one.
    pub fn input<T: DeserializeOwned>(&self) -> Result<Option<T>, RunnerError> {
        self.data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RunnerError::InvalidInput(e.to_string()))
    }

    /// Decode the task input or return error if there is none
    pub fn require_input<T: DeserializeOwned>(&self) -> Result<T, RunnerError> {
        self.input()?
            .ok_or_else(|| RunnerError::InvalidInput("missing task input".to_string()))
    }

    /// Borrow the prepared value as `T`, if one exists and has that type.
    pub fn prepared<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.prepared.as_ref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("workflow_id", &self.workflow_id)
            .field("seq", &self.seq)
            .field("attempt", &self.attempt)
            .field("data", &self.data)
            .field("prepared", &self.prepared.is_some())
            .finish()
    }
}

/// Structured result of one task execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed {
        /// JSON-encoded return value
        data: Option<String>,
    },
    Failed {
        error: TaskError,
        /// Diagnostic payload stored alongside the error
        data: Option<String>,
        abort: Option<AbortScope>,
    },
}

impl TaskOutcome {
    pub fn completed() -> Self {
        TaskOutcome::Completed { data: None }
    }

    pub fn completed_with<T: Serialize>(value: &T) -> Result<Self, RunnerError> {
        Ok(TaskOutcome::Completed {
            data: Some(serde_json::to_string(value)?),
        })
    }

    /// A failure with no abort scope. Unexpected errors without a scope are
    /// retried; expected ones fail the task.
    pub fn failed(error: TaskError) -> Self {
        TaskOutcome::Failed {
            error,
            data: None,
            abort: None,
        }
    }

    pub fn abort_task(error: TaskError) -> Self {
        Self::failed(error).with_abort(AbortScope::Task)
    }

    pub fn abort_workflow(error: TaskError) -> Self {
        Self::failed(error).with_abort(AbortScope::Workflow)
    }

    pub fn with_abort(mut self, scope: AbortScope) -> Self {
        if let TaskOutcome::Failed { abort, .. } = &mut self {
            *abort = Some(scope);
        }
        self
    }

    /// Attach an encoded payload (return value or diagnostic data).
    pub fn with_data<T: Serialize>(mut self, value: &T) -> Result<Self, RunnerError> {
        let encoded = Some(serde_json::to_string(value)?);
        match &mut self {
            TaskOutcome::Completed { data } | TaskOutcome::Failed { data, .. } => *data = encoded,
        }
        Ok(self)
    }

    /// The scope the driver acts on: an explicit `abort` wins, an expected
    /// error otherwise fails only its task, anything else has no scope
    /// (retry). Only an explicit `abort: workflow` fails the workflow.
    pub fn effective_scope(&self) -> Option<AbortScope> {
        match self {
            TaskOutcome::Completed { .. } => None,
            TaskOutcome::Failed { abort: Some(scope), .. } => Some(*scope),
            TaskOutcome::Failed { error, .. } if error.is_expected() => Some(AbortScope::Task),
            TaskOutcome::Failed { .. } => None,
        }
    }
}
