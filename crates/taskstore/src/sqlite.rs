//! SQLite storage backend.
//!
//! One shared connection. Statements run on the blocking pool; every
//! multi-statement write holds the [`WriteLock`] and runs inside a
//! transaction, which rolls back when dropped uncommitted.

use crate::lock::WriteLock;
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use taskcore::{
    expiry_cutoff_ms, now_ms, NewWorkflow, NewWorkflowTask, Status, StorageError,
    StorageProvider, TaskUpdate, WorkflowRow, WorkflowTaskRow,
};

const SCHEMA: &str = r#"
create table if not exists workflows (
    id text primary key,
    status text not null,
    created_ms integer not null,
    updated_ms integer not null
);

create table if not exists workflow_tasks (
    id integer primary key autoincrement,
    workflow_id text not null,
    task_name text not null,
    seq integer not null,
    status text not null,
    data text,
    "return" text,
    error text,
    created_ms integer not null,
    updated_ms integer not null,
    foreign key (workflow_id) references workflows(id)
);

create index if not exists idx_workflows_status on workflows(status);
create index if not exists idx_workflows_created_ms on workflows(created_ms);
create unique index if not exists idx_workflow_tasks_workflow_seq on workflow_tasks(workflow_id, seq);
create index if not exists idx_workflow_tasks_status on workflow_tasks(status);
"#;

const WORKFLOW_COLUMNS: &str = "id, status, created_ms, updated_ms";
const TASK_COLUMNS: &str =
    r#"workflow_id, task_name, seq, status, data, "return", error, created_ms, updated_ms"#;

#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    write_lock: WriteLock,
}

impl SqliteStorage {
    /// Open (or create) a database file. Call `init` before use.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            write_lock: WriteLock::new(),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StorageError::Backend(format!("Lock error: {}", e)))?;
            f(&mut conn).map_err(db_err)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("Blocking task failed: {}", e)))?
    }
}

fn db_err(err: rusqlite::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Status> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: StorageError| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn workflow_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        id: row.get(0)?,
        status: status_column(row, 1)?,
        created_ms: row.get(2)?,
        updated_ms: row.get(3)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowTaskRow> {
    Ok(WorkflowTaskRow {
        workflow_id: row.get(0)?,
        task_name: row.get(1)?,
        seq: row.get(2)?,
        status: status_column(row, 3)?,
        data: row.get(4)?,
        return_data: row.get(5)?,
        error: row.get(6)?,
        created_ms: row.get(7)?,
        updated_ms: row.get(8)?,
    })
}

fn find_workflow(conn: &Connection, workflow_id: &str) -> rusqlite::Result<Option<WorkflowRow>> {
    conn.query_row(
        &format!("select {} from workflows where id = ?1", WORKFLOW_COLUMNS),
        params![workflow_id],
        workflow_from_row,
    )
    .optional()
}

fn write_task(
    conn: &Connection,
    workflow_id: &str,
    seq: u32,
    status: Status,
    update: &TaskUpdate,
    now: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        r#"update workflow_tasks
           set status = ?1, "return" = ?2, error = ?3, updated_ms = ?4
           where workflow_id = ?5 and seq = ?6"#,
        params![
            status.as_str(),
            update.data,
            update.error_message,
            now,
            workflow_id,
            seq
        ],
    )
}

fn write_workflow_status(
    conn: &Connection,
    workflow_id: &str,
    status: Status,
    now: i64,
) -> rusqlite::Result<usize> {
    conn.execute(
        "update workflows set status = ?1, updated_ms = ?2 where id = ?3",
        params![status.as_str(), now, workflow_id],
    )
}

#[async_trait]
impl StorageProvider for SqliteStorage {
    async fn init(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch("pragma foreign_keys = on;")?;
            conn.execute_batch(SCHEMA)
        })
        .await?;
        tracing::debug!("sqlite schema ready");
        Ok(())
    }

    async fn pending_workflows(&self) -> Result<Vec<WorkflowRow>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "select {} from workflows where status = ?1",
                WORKFLOW_COLUMNS
            ))?;
            let rows = stmt.query_map(params![Status::Pending.as_str()], workflow_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRow>, StorageError> {
        let workflow_id = workflow_id.to_string();
        self.with_conn(move |conn| find_workflow(conn, &workflow_id))
            .await
    }

    async fn next_workflow_task(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowTaskRow>, StorageError> {
        let workflow_id = workflow_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "select {} from workflow_tasks
                     where workflow_id = ?1 and status = ?2
                     order by seq asc
                     limit 1",
                    TASK_COLUMNS
                ),
                params![workflow_id, Status::Pending.as_str()],
                task_from_row,
            )
            .optional()
        })
        .await
    }

    async fn workflow_tasks(&self, workflow_id: &str) -> Result<Vec<WorkflowTaskRow>, StorageError> {
        let workflow_id = workflow_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "select {} from workflow_tasks where workflow_id = ?1 order by seq asc",
                TASK_COLUMNS
            ))?;
            let rows = stmt.query_map(params![workflow_id], task_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: Status,
    ) -> Result<(), StorageError> {
        let id = workflow_id.to_string();
        let changed = self
            .with_conn(move |conn| write_workflow_status(conn, &id, status, now_ms()))
            .await?;
        if changed == 0 {
            return Err(StorageError::NotFound(workflow_id.to_string()));
        }
        Ok(())
    }

    async fn update_workflow_task_status(
        &self,
        workflow_id: &str,
        seq: u32,
        status: Status,
        update: TaskUpdate,
        workflow_status: Option<Status>,
    ) -> Result<(), StorageError> {
        let id = workflow_id.to_string();

        let Some(workflow_status) = workflow_status else {
            let changed = self
                .with_conn(move |conn| write_task(conn, &id, seq, status, &update, now_ms()))
                .await?;
            if changed == 0 {
                return Err(StorageError::NotFound(format!("{} task {}", workflow_id, seq)));
            }
            return Ok(());
        };

        let _guard = self.write_lock.acquire().await;
        let updated = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let now = now_ms();
                if write_task(&tx, &id, seq, status, &update, now)? == 0 {
                    return Ok(false);
                }
                if write_workflow_status(&tx, &id, workflow_status, now)? == 0 {
                    return Ok(false);
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;
        if !updated {
            return Err(StorageError::NotFound(format!("{} task {}", workflow_id, seq)));
        }
        Ok(())
    }

    async fn delete_old_workflows_and_tasks(&self, older_than_ms: u64) -> Result<u64, StorageError> {
        let Some(cutoff) = expiry_cutoff_ms(older_than_ms) else {
            return Ok(0);
        };
        let _guard = self.write_lock.acquire().await;
        let deleted = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "delete from workflow_tasks
                     where workflow_id in (select id from workflows where created_ms < ?1)",
                    params![cutoff],
                )?;
                let deleted = tx.execute("delete from workflows where created_ms < ?1", params![cutoff])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted as u64)
    }

    async fn insert_workflow_and_tasks(
        &self,
        workflow: NewWorkflow,
        tasks: Vec<NewWorkflowTask>,
    ) -> Result<WorkflowRow, StorageError> {
        let _guard = self.write_lock.acquire().await;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if let Some(existing) = find_workflow(&tx, &workflow.id)? {
                return Ok(existing);
            }

            let now = now_ms();
            tx.execute(
                "insert into workflows (id, status, created_ms, updated_ms) values (?1, ?2, ?3, ?4)",
                params![workflow.id, workflow.status.as_str(), now, now],
            )?;
            {
                let mut stmt = tx.prepare(
                    "insert into workflow_tasks
                     (workflow_id, task_name, seq, status, data, created_ms, updated_ms)
                     values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for task in &tasks {
                    stmt.execute(params![
                        workflow.id,
                        task.task_name,
                        task.seq,
                        task.status.as_str(),
                        task.data,
                        now,
                        now
                    ])?;
                }
            }
            tx.commit()?;

            Ok(WorkflowRow {
                id: workflow.id,
                status: workflow.status,
                created_ms: now,
                updated_ms: now,
            })
        })
        .await
    }
}
