use crate::{FlowError, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type WorkflowId = String;

/// Status shared by workflows and their tasks. `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(StorageError::Corrupt(format!("unknown status '{}'", other))),
        }
    }
}

/// Persisted workflow record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: WorkflowId,
    pub status: Status,
    pub created_ms: i64,
    pub updated_ms: i64,
}

/// Persisted task record, identified by `(workflow_id, seq)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTaskRow {
    pub workflow_id: WorkflowId,
    pub task_name: String,
    pub seq: u32,
    pub status: Status,
    /// JSON-encoded task input
    pub data: Option<String>,
    /// JSON-encoded output attached by the runner
    #[serde(rename = "return")]
    pub return_data: Option<String>,
    pub error: Option<String>,
    pub created_ms: i64,
    pub updated_ms: i64,
}

/// Workflow row as handed to storage for insertion; timestamps are
/// generated by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkflow {
    pub id: WorkflowId,
    pub status: Status,
}

impl NewWorkflow {
    pub fn pending(id: impl Into<WorkflowId>) -> Self {
        Self {
            id: id.into(),
            status: Status::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkflowTask {
    pub task_name: String,
    pub seq: u32,
    pub status: Status,
    pub data: Option<String>,
}

/// One step of a workflow submission: the runner name plus its encoded input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub data: Option<String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    /// Encode `input` as the task's JSON payload.
    pub fn with_input<T: Serialize>(mut self, input: &T) -> Result<Self, serde_json::Error> {
        self.data = Some(serde_json::to_string(input)?);
        Ok(self)
    }

    /// Use an already-encoded payload as is.
    pub fn with_raw_input(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Turn an ordered submission into pending task rows, `seq` = position.
pub fn pending_tasks(specs: Vec<TaskSpec>) -> Result<Vec<NewWorkflowTask>, FlowError> {
    check_task_count(specs.len())?;
    Ok(specs
        .into_iter()
        .zip(0u32..)
        .map(|(spec, seq)| NewWorkflowTask {
            task_name: spec.name,
            seq,
            status: Status::Pending,
            data: spec.data,
        })
        .collect())
}

fn check_task_count(count: usize) -> Result<(), FlowError> {
    u32::try_from(count)
        .map(|_| ())
        .map_err(|_| FlowError::TooManyTasks(count))
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
