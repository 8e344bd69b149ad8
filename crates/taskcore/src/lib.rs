//! Core abstractions for the task engine
//!
//! Workflow and task records, the task runner contract, and the storage
//! contract every backend implements. No execution logic lives here.

mod error;
pub mod events;
pub mod storage;
mod task;
mod workflow;

pub use error::{FlowError, RunnerError, StorageError, TaskError};
pub use events::{EventBus, ExecutionEvent};
pub use storage::{expiry_cutoff_ms, StorageProvider, TaskUpdate};
pub use task::{AbortScope, PreparedData, TaskContext, TaskOutcome, TaskRunner};
pub use workflow::{
    now_ms, pending_tasks, NewWorkflow, NewWorkflowTask, Status, TaskSpec, WorkflowId,
    WorkflowRow, WorkflowTaskRow,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, FlowError>;
