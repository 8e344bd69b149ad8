//! In-memory storage backend.
//!
//! Reference implementation of the storage contract. Clones share the same
//! tables, so handing a clone to a fresh runner is how tests simulate a
//! process restart.

use crate::lock::WriteLock;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use taskcore::{
    expiry_cutoff_ms, now_ms, NewWorkflow, NewWorkflowTask, Status, StorageError,
    StorageProvider, TaskUpdate, WorkflowRow, WorkflowTaskRow,
};

#[derive(Default)]
struct Tables {
    workflows: HashMap<String, WorkflowRow>,
    // Keyed by (workflow_id, seq) so a workflow's tasks are a contiguous range
    tasks: BTreeMap<(String, u32), WorkflowTaskRow>,
}

impl Tables {
    fn tasks_of<'a>(&'a self, workflow_id: &str) -> impl Iterator<Item = &'a WorkflowTaskRow> + 'a {
        let start = (workflow_id.to_string(), 0);
        let end = (workflow_id.to_string(), u32::MAX);
        self.tasks.range(start..=end).map(|(_, task)| task)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    write_lock: WriteLock,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StorageError> {
        let tables = self
            .tables
            .read()
            .map_err(|e| StorageError::Backend(format!("Lock error: {}", e)))?;
        Ok(f(&tables))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|e| StorageError::Backend(format!("Lock error: {}", e)))?;
        f(&mut tables)
    }
}

fn apply_task_update(
    tables: &mut Tables,
    workflow_id: &str,
    seq: u32,
    status: Status,
    update: TaskUpdate,
    now: i64,
) -> Result<(), StorageError> {
    let task = tables
        .tasks
        .get_mut(&(workflow_id.to_string(), seq))
        .ok_or_else(|| StorageError::NotFound(format!("{} task {}", workflow_id, seq)))?;
    task.status = status;
    task.return_data = update.data;
    task.error = update.error_message;
    task.updated_ms = now;
    Ok(())
}

fn apply_workflow_status(
    tables: &mut Tables,
    workflow_id: &str,
    status: Status,
    now: i64,
) -> Result<(), StorageError> {
    let workflow = tables
        .workflows
        .get_mut(workflow_id)
        .ok_or_else(|| StorageError::NotFound(workflow_id.to_string()))?;
    workflow.status = status;
    workflow.updated_ms = now;
    Ok(())
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn pending_workflows(&self) -> Result<Vec<WorkflowRow>, StorageError> {
        self.read(|t| {
            t.workflows
                .values()
                .filter(|w| w.status == Status::Pending)
                .cloned()
                .collect()
        })
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRow>, StorageError> {
        self.read(|t| t.workflows.get(workflow_id).cloned())
    }

    async fn next_workflow_task(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowTaskRow>, StorageError> {
        self.read(|t| {
            t.tasks_of(workflow_id)
                .find(|task| task.status == Status::Pending)
                .cloned()
        })
    }

    async fn workflow_tasks(&self, workflow_id: &str) -> Result<Vec<WorkflowTaskRow>, StorageError> {
        self.read(|t| t.tasks_of(workflow_id).cloned().collect())
    }

    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: Status,
    ) -> Result<(), StorageError> {
        self.write(|t| apply_workflow_status(t, workflow_id, status, now_ms()))
    }

    async fn update_workflow_task_status(
        &self,
        workflow_id: &str,
        seq: u32,
        status: Status,
        update: TaskUpdate,
        workflow_status: Option<Status>,
    ) -> Result<(), StorageError> {
        let Some(workflow_status) = workflow_status else {
            return self.write(|t| apply_task_update(t, workflow_id, seq, status, update, now_ms()));
        };

        let _guard = self.write_lock.acquire().await;
        self.write(|t| {
            // Check both rows before touching either
            if !t.workflows.contains_key(workflow_id) {
                return Err(StorageError::NotFound(workflow_id.to_string()));
            }
            let now = now_ms();
            apply_task_update(t, workflow_id, seq, status, update, now)?;
            apply_workflow_status(t, workflow_id, workflow_status, now)
        })
    }

    async fn delete_old_workflows_and_tasks(&self, older_than_ms: u64) -> Result<u64, StorageError> {
        let Some(cutoff) = expiry_cutoff_ms(older_than_ms) else {
            return Ok(0);
        };
        let _guard = self.write_lock.acquire().await;
        self.write(|t| {
            let expired: HashSet<String> = t
                .workflows
                .values()
                .filter(|w| w.created_ms < cutoff)
                .map(|w| w.id.clone())
                .collect();
            t.tasks.retain(|(workflow_id, _), _| !expired.contains(workflow_id));
            for id in &expired {
                t.workflows.remove(id);
            }
            Ok(expired.len() as u64)
        })
    }

    async fn insert_workflow_and_tasks(
        &self,
        workflow: NewWorkflow,
        tasks: Vec<NewWorkflowTask>,
    ) -> Result<WorkflowRow, StorageError> {
        let _guard = self.write_lock.acquire().await;
        self.write(|t| {
            if let Some(existing) = t.workflows.get(&workflow.id) {
                return Ok(existing.clone());
            }

            let now = now_ms();
            let row = WorkflowRow {
                id: workflow.id.clone(),
                status: workflow.status,
                created_ms: now,
                updated_ms: now,
            };
            t.workflows.insert(row.id.clone(), row.clone());
            for task in tasks {
                t.tasks.insert(
                    (workflow.id.clone(), task.seq),
                    WorkflowTaskRow {
                        workflow_id: workflow.id.clone(),
                        task_name: task.task_name,
                        seq: task.seq,
                        status: task.status,
                        data: task.data,
                        return_data: None,
                        error: None,
                        created_ms: now,
                        updated_ms: now,
                    },
                );
            }
            Ok(row)
        })
    }
}
