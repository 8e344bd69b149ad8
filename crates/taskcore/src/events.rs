use crate::{AbortScope, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while driving workflows. Purely observational: nothing
/// in the engine depends on them being received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        seq: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Driver stopped without a terminal status (missing runner).
    WorkflowStalled {
        workflow_id: WorkflowId,
        seq: u32,
        task_name: String,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        workflow_id: WorkflowId,
        seq: u32,
        task_name: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        workflow_id: WorkflowId,
        seq: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        workflow_id: WorkflowId,
        seq: u32,
        error: String,
        scope: AbortScope,
        timestamp: DateTime<Utc>,
    },
    TaskRetrying {
        workflow_id: WorkflowId,
        seq: u32,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RetentionSwept {
        deleted: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn workflow_id(&self) -> Option<&str> {
        match self {
            ExecutionEvent::WorkflowStarted { workflow_id, .. }
            | ExecutionEvent::WorkflowCompleted { workflow_id, .. }
            | ExecutionEvent::WorkflowFailed { workflow_id, .. }
            | ExecutionEvent::WorkflowStalled { workflow_id, .. }
            | ExecutionEvent::TaskStarted { workflow_id, .. }
            | ExecutionEvent::TaskCompleted { workflow_id, .. }
            | ExecutionEvent::TaskFailed { workflow_id, .. }
            | ExecutionEvent::TaskRetrying { workflow_id, .. } => Some(workflow_id),
            ExecutionEvent::RetentionSwept { .. } => None,
        }
    }
}

/// Process-wide event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Best effort: dropped when nobody listens, lost by lagging receivers.
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
