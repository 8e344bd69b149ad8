use crate::driver::{DriverExit, WorkflowDriver};
use crate::registry::TaskRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use taskcore::{
    pending_tasks, EventBus, ExecutionEvent, FlowError, NewWorkflow, StorageProvider, TaskSpec,
    WorkflowRow,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Configuration for the runner
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Pause before re-running a task that failed without an abort scope
    pub retry_delay: Duration,
    pub retention: Option<RetentionPolicy>,
    pub event_buffer_size: usize,
}

impl RuntimeConfig {
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_retention(mut self, expiry: Duration, check_interval: Duration) -> Self {
        self.retention = Some(RetentionPolicy {
            expiry,
            check_interval,
        });
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            retention: None,
            event_buffer_size: 1000,
        }
    }
}

/// Age-based deletion of workflows and their tasks, regardless of status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub expiry: Duration,
    pub check_interval: Duration,
}

impl RetentionPolicy {
    /// A zero expiry or interval counts as "not configured".
    fn is_active(&self) -> bool {
        !self.expiry.is_zero() && !self.check_interval.is_zero()
    }
}

/// Handle to a spawned driver
pub struct DriverHandle {
    /// The row the driver was spawned for, as returned by storage
    pub workflow: WorkflowRow,
    handle: JoinHandle<Result<DriverExit, FlowError>>,
}

impl DriverHandle {
    pub fn workflow_id(&self) -> &str {
        &self.workflow.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the driver to stop
    pub async fn wait(self) -> Result<DriverExit, FlowError> {
        self.handle
            .await
            .map_err(|e| FlowError::Execution(format!("Driver join error: {}", e)))?
    }
}

/// Wait for every handle, returning results in the same order
pub async fn wait_all(handles: Vec<DriverHandle>) -> Vec<Result<DriverExit, FlowError>> {
    futures::future::join_all(handles.into_iter().map(DriverHandle::wait)).await
}

/// Accepts workflows, spawns a driver per workflow and runs the optional
/// retention sweep.
pub struct WorkflowRunner {
    registry: Arc<TaskRegistry>,
    storage: Arc<dyn StorageProvider>,
    event_bus: EventBus,
    config: RuntimeConfig,
    cancel: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl WorkflowRunner {
    /// Initialize storage and start the retention sweep if one is configured
    pub async fn start(
        config: RuntimeConfig,
        registry: Arc<TaskRegistry>,
        storage: Arc<dyn StorageProvider>,
    ) -> Result<Self, FlowError> {
        storage.init().await?;

        let event_bus = EventBus::new(config.event_buffer_size);
        let cancel = CancellationToken::new();

        let sweeper = match config.retention {
            Some(policy) if policy.is_active() => {
                tracing::info!(
                    expiry_ms = millis(policy.expiry),
                    interval_ms = millis(policy.check_interval),
                    "starting retention sweep"
                );
                Some(tokio::spawn(sweep_loop(
                    policy,
                    storage.clone(),
                    event_bus.clone(),
                    cancel.clone(),
                )))
            }
            Some(_) => {
                tracing::warn!("retention policy has a zero expiry or interval, sweep disabled");
                None
            }
            None => None,
        };

        tracing::info!(
            runners = registry.len(),
            retry_delay_ms = millis(config.retry_delay),
            "workflow runner started"
        );

        Ok(Self {
            registry,
            storage,
            event_bus,
            config,
            cancel,
            sweeper,
        })
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Subscribe to execution events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Persist a workflow and spawn its driver.
    ///
    /// Submitting an id that already exists writes nothing; the driver is
    /// still spawned for the stored row and exits at once if it is terminal.
    pub async fn submit(
        &self,
        workflow_id: impl Into<String>,
        tasks: Vec<TaskSpec>,
    ) -> Result<DriverHandle, FlowError> {
        let workflow_id = workflow_id.into();
        let task_count = tasks.len();
        let workflow = self
            .storage
            .insert_workflow_and_tasks(NewWorkflow::pending(workflow_id), pending_tasks(tasks)?)
            .await?;
        tracing::info!(workflow_id = %workflow.id, tasks = task_count, "workflow submitted");
        Ok(self.spawn_driver(workflow))
    }

    /// Spawn a driver for every pending workflow in storage
    pub async fn recover(&self) -> Result<Vec<DriverHandle>, FlowError> {
        let pending = self.storage.pending_workflows().await?;
        tracing::info!(count = pending.len(), "recovering pending workflows");
        Ok(pending
            .into_iter()
            .map(|workflow| self.spawn_driver(workflow))
            .collect())
    }

    /// Delete workflows older than `expiry` right now
    pub async fn sweep_expired(&self, expiry: Duration) -> Result<u64, FlowError> {
        Ok(sweep_once(self.storage.as_ref(), &self.event_bus, expiry).await?)
    }

    /// Stop the retention sweep. Running drivers are left alone.
    pub async fn shutdown(mut self) -> Result<(), FlowError> {
        self.cancel.cancel();
        if let Some(sweeper) = self.sweeper.take() {
            sweeper
                .await
                .map_err(|e| FlowError::Execution(format!("Retention task join error: {}", e)))?;
        }
        tracing::info!("workflow runner stopped");
        Ok(())
    }

    fn spawn_driver(&self, workflow: WorkflowRow) -> DriverHandle {
        let driver = WorkflowDriver::new(
            workflow.id.clone(),
            self.registry.clone(),
            self.storage.clone(),
            self.event_bus.clone(),
            self.config.retry_delay,
        );
        let span = tracing::info_span!("workflow", workflow_id = %workflow.id);
        let handle = tokio::spawn(driver.run().instrument(span));
        DriverHandle { workflow, handle }
    }
}

impl Drop for WorkflowRunner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn sweep_once(
    storage: &dyn StorageProvider,
    event_bus: &EventBus,
    expiry: Duration,
) -> Result<u64, taskcore::StorageError> {
    let deleted = storage
        .delete_old_workflows_and_tasks(millis(expiry))
        .await?;
    if deleted > 0 {
        tracing::info!(deleted, "deleted expired workflows");
    }
    event_bus.emit(ExecutionEvent::RetentionSwept {
        deleted,
        timestamp: Utc::now(),
    });
    Ok(deleted)
}

async fn sweep_loop(
    policy: RetentionPolicy,
    storage: Arc<dyn StorageProvider>,
    event_bus: EventBus,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(policy.check_interval);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("retention sweep cancelled");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = sweep_once(storage.as_ref(), &event_bus, policy.expiry).await {
                    tracing::error!(error = %e, "retention sweep failed");
                }
            }
        }
    }
}
