//! Storage contract consumed by the engine.
//!
//! The engine keeps no durable state of its own: every workflow and task
//! transition goes through a [`StorageProvider`], which makes a freshly
//! started driver able to pick up exactly where a crashed one stopped.

use crate::{now_ms, NewWorkflow, NewWorkflowTask, Status, StorageError, WorkflowRow, WorkflowTaskRow};
use async_trait::async_trait;

/// Result half of a task status write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    /// JSON-encoded payload stored in the task's `return` column
    pub data: Option<String>,
    pub error_message: Option<String>,
}

impl TaskUpdate {
    pub fn completed(data: Option<String>) -> Self {
        Self {
            data,
            error_message: None,
        }
    }

    pub fn failed(error_message: impl Into<String>, data: Option<String>) -> Self {
        Self {
            data,
            error_message: Some(error_message.into()),
        }
    }
}

/// Creation-time cutoff for an age-based delete: rows with `created_ms`
/// below it are expired. `None` when the age reaches back past the epoch
/// range, in which case nothing is old enough to delete.
pub fn expiry_cutoff_ms(older_than_ms: u64) -> Option<i64> {
    cutoff_from(now_ms(), older_than_ms)
}

fn cutoff_from(now: i64, older_than_ms: u64) -> Option<i64> {
    i64::try_from(older_than_ms)
        .ok()
        .and_then(|ms| now.checked_sub(ms))
}

/// Persistence boundary for workflows and their tasks.
///
/// Operations that write more than one row run in a single transaction and
/// are serialized against each other; reads are not and may observe
/// slightly stale state.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Idempotent setup (schema creation...). Called once before anything else.
    async fn init(&self) -> Result<(), StorageError>;

    /// All workflows whose status is `pending`, in no particular order.
    async fn pending_workflows(&self) -> Result<Vec<WorkflowRow>, StorageError>;

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRow>, StorageError>;

    /// The pending task with the smallest `seq` for this workflow.
    async fn next_workflow_task(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowTaskRow>, StorageError>;

    /// Every task of the workflow ordered by `seq`.
    async fn workflow_tasks(&self, workflow_id: &str) -> Result<Vec<WorkflowTaskRow>, StorageError>;

    /// Set a workflow's status and `updated_ms`.
    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: Status,
    ) -> Result<(), StorageError>;

    /// Update one task's status, return payload and error. When
    /// `workflow_status` is given the workflow row is updated in the same
    /// transaction: both writes happen or neither does.
    async fn update_workflow_task_status(
        &self,
        workflow_id: &str,
        seq: u32,
        status: Status,
        update: TaskUpdate,
        workflow_status: Option<Status>,
    ) -> Result<(), StorageError>;

    /// Atomically delete the tasks, then the workflows, created more than
    /// `older_than_ms` milliseconds ago, whatever their status. Returns the
    /// number of workflows removed.
    async fn delete_old_workflows_and_tasks(&self, older_than_ms: u64) -> Result<u64, StorageError>;

    /// Atomically insert a workflow and its tasks, generating timestamps.
    ///
    /// Idempotent on the workflow id: if it already exists the stored row is
    /// returned and nothing is written.
    async fn insert_workflow_and_tasks(
        &self,
        workflow: NewWorkflow,
        tasks: Vec<NewWorkflowTask>,
    ) -> Result<WorkflowRow, StorageError>;
}
