use crate::registry::TaskRegistry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskcore::{
    AbortScope, EventBus, ExecutionEvent, FlowError, PreparedData, Status, StorageProvider,
    TaskContext, TaskError, TaskOutcome, TaskRunner, TaskUpdate, WorkflowId, WorkflowTaskRow,
};

/// Why a driver stopped without an infrastructure error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverExit {
    /// No pending task was left; the workflow is now `completed`.
    Completed,
    /// A task failed with workflow scope; the workflow is now `failed`.
    Failed { seq: u32 },
    /// The next task names a runner that is not registered. Nothing was
    /// marked terminal; register the runner and recover to continue.
    MissingRunner { seq: u32, task_name: String },
    /// The workflow was already terminal when the driver started.
    AlreadyTerminal(Status),
    /// The workflow row does not exist.
    Missing,
}

/// Drives one workflow through its tasks, one at a time.
///
/// All progress lives in storage: every iteration re-reads the lowest
/// pending task, so a fresh driver for the same workflow resumes exactly
/// where a previous one stopped. Attempt counters and prepared values are
/// in memory only and start over on every run.
pub struct WorkflowDriver {
    workflow_id: WorkflowId,
    registry: Arc<TaskRegistry>,
    storage: Arc<dyn StorageProvider>,
    event_bus: EventBus,
    retry_delay: Duration,
    prepared: HashMap<String, Option<PreparedData>>,
}

impl WorkflowDriver {
    pub fn new(
        workflow_id: impl Into<WorkflowId>,
        registry: Arc<TaskRegistry>,
        storage: Arc<dyn StorageProvider>,
        event_bus: EventBus,
        retry_delay: Duration,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            registry,
            storage,
            event_bus,
            retry_delay,
            prepared: HashMap::new(),
        }
    }

    /// Run until the workflow is terminal or cannot progress.
    ///
    /// An `Err` leaves the workflow `pending` with its current task
    /// untouched, the same state a process crash would leave behind.
    pub async fn run(mut self) -> Result<DriverExit, FlowError> {
        let result = self.drive().await;
        if let Err(e) = &result {
            tracing::error!(workflow_id = %self.workflow_id, error = %e, "error executing workflow");
        }
        result
    }

    async fn drive(&mut self) -> Result<DriverExit, FlowError> {
        let workflow_id = self.workflow_id.clone();

        match self.storage.get_workflow(&workflow_id).await? {
            None => {
                tracing::warn!(workflow_id = %workflow_id, "workflow not found, nothing to drive");
                return Ok(DriverExit::Missing);
            }
            Some(workflow) if workflow.status.is_terminal() => {
                tracing::info!(
                    workflow_id = %workflow_id,
                    status = %workflow.status,
                    "workflow already terminal, not driving"
                );
                return Ok(DriverExit::AlreadyTerminal(workflow.status));
            }
            Some(_) => {}
        }

        tracing::info!(workflow_id = %workflow_id, "executing workflow");
        self.event_bus.emit(ExecutionEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
            timestamp: Utc::now(),
        });

        let mut current_seq: Option<u32> = None;
        let mut attempt = 0u32;

        loop {
            tracing::debug!(workflow_id = %workflow_id, "getting next workflow task");
            let Some(task) = self.storage.next_workflow_task(&workflow_id).await? else {
                self.storage
                    .update_workflow_status(&workflow_id, Status::Completed)
                    .await?;
                tracing::info!(workflow_id = %workflow_id, "workflow completed");
                self.event_bus.emit(ExecutionEvent::WorkflowCompleted {
                    workflow_id,
                    timestamp: Utc::now(),
                });
                return Ok(DriverExit::Completed);
            };

            // Retries of the same task keep counting; a new task starts at 0
            if current_seq != Some(task.seq) {
                current_seq = Some(task.seq);
                attempt = 0;
            }

            let Some(runner) = self.registry.get(&task.task_name) else {
                tracing::error!(
                    workflow_id = %workflow_id,
                    seq = task.seq,
                    task_name = %task.task_name,
                    "task name not found, halting workflow (register the runner and recover to resume)"
                );
                self.event_bus.emit(ExecutionEvent::WorkflowStalled {
                    workflow_id,
                    seq: task.seq,
                    task_name: task.task_name.clone(),
                    timestamp: Utc::now(),
                });
                return Ok(DriverExit::MissingRunner {
                    seq: task.seq,
                    task_name: task.task_name,
                });
            };

            let mut ctx = TaskContext {
                workflow_id: workflow_id.clone(),
                seq: task.seq,
                attempt,
                data: task.data.clone(),
                prepared: None,
            };
            ctx.prepared = self.prepared_for(&task, &runner, ctx.clone()).await;

            match self.execute_task(&task, &runner, ctx).await? {
                Step::Advance => {}
                Step::Retry => {
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                    tracing::debug!(workflow_id = %workflow_id, seq = task.seq, attempt, "retrying task");
                }
                Step::Stop(exit) => return Ok(exit),
            }
        }
    }

    /// Prepared value for this task name, calling `prepare` on first use in
    /// this run. A failed prepare is cached as "no value".
    async fn prepared_for(
        &mut self,
        task: &WorkflowTaskRow,
        runner: &Arc<dyn TaskRunner>,
        ctx: TaskContext,
    ) -> Option<PreparedData> {
        if let Some(cached) = self.prepared.get(&task.task_name) {
            return cached.clone();
        }

        let value = match runner.prepare(ctx).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    workflow_id = %self.workflow_id,
                    seq = task.seq,
                    task_name = %task.task_name,
                    error = %e,
                    "task failed to prepare, continuing without prepared data"
                );
                None
            }
        };
        self.prepared.insert(task.task_name.clone(), value.clone());
        value
    }

    /// Execute one attempt and persist whatever it decided.
    async fn execute_task(
        &self,
        task: &WorkflowTaskRow,
        runner: &Arc<dyn TaskRunner>,
        ctx: TaskContext,
    ) -> Result<Step, FlowError> {
        let workflow_id = &self.workflow_id;
        let attempt = ctx.attempt;

        tracing::debug!(workflow_id = %workflow_id, seq = task.seq, attempt, "executing task");
        self.event_bus.emit(ExecutionEvent::TaskStarted {
            workflow_id: workflow_id.clone(),
            seq: task.seq,
            task_name: task.task_name.clone(),
            attempt,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let outcome = runner
            .execute(ctx)
            .await
            .map_err(|source| FlowError::Runner {
                task: task.task_name.clone(),
                source,
            })?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let scope = outcome.effective_scope();
        let (error, data) = match outcome {
            TaskOutcome::Completed { data } => {
                tracing::info!(workflow_id = %workflow_id, seq = task.seq, duration_ms, "task completed");
                self.storage
                    .update_workflow_task_status(
                        workflow_id,
                        task.seq,
                        Status::Completed,
                        TaskUpdate::completed(data),
                        None,
                    )
                    .await?;
                self.event_bus.emit(ExecutionEvent::TaskCompleted {
                    workflow_id: workflow_id.clone(),
                    seq: task.seq,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                return Ok(Step::Advance);
            }
            TaskOutcome::Failed { error, data, .. } => (error, data),
        };

        if let TaskError::Expected { abort: reported, .. } = &error {
            tracing::info!(
                workflow_id = %workflow_id,
                seq = task.seq,
                error = %error,
                reported_scope = ?reported,
                abort = ?scope,
                "expected task execution error"
            );
        } else {
            tracing::error!(
                workflow_id = %workflow_id,
                seq = task.seq,
                error = %error,
                abort = ?scope,
                "task execution error"
            );
        }

        let Some(scope) = scope else {
            self.event_bus.emit(ExecutionEvent::TaskRetrying {
                workflow_id: workflow_id.clone(),
                seq: task.seq,
                attempt,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(Step::Retry);
        };

        let workflow_status = match scope {
            AbortScope::Workflow => {
                tracing::warn!(workflow_id = %workflow_id, seq = task.seq, "failing workflow");
                Some(Status::Failed)
            }
            AbortScope::Task => None,
        };

        tracing::info!(workflow_id = %workflow_id, seq = task.seq, "failing task");
        self.storage
            .update_workflow_task_status(
                workflow_id,
                task.seq,
                Status::Failed,
                TaskUpdate::failed(error.message(), data),
                workflow_status,
            )
            .await?;
        self.event_bus.emit(ExecutionEvent::TaskFailed {
            workflow_id: workflow_id.clone(),
            seq: task.seq,
            error: error.to_string(),
            scope,
            timestamp: Utc::now(),
        });

        if scope == AbortScope::Workflow {
            self.event_bus.emit(ExecutionEvent::WorkflowFailed {
                workflow_id: workflow_id.clone(),
                seq: task.seq,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
            return Ok(Step::Stop(DriverExit::Failed { seq: task.seq }));
        }
        Ok(Step::Advance)
    }
}

/// What the loop does after one attempt
enum Step {
    Advance,
    Retry,
    Stop(DriverExit),
}
