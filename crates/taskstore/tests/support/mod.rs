//! Storage contract suite shared by every backend's integration tests.
//!
//! Each backend test file supplies a [`Fixture`] and expands
//! [`storage_contract_tests!`]; every check below then runs against it.

#![allow(dead_code)]

use std::time::Duration;
use taskcore::{
    NewWorkflow, NewWorkflowTask, Status, StorageError, StorageProvider, TaskUpdate,
};
use uuid::Uuid;

/// Hands out connections to one backing store. Two connections from the
/// same fixture see the same data, which is how a restart is simulated.
pub trait Fixture {
    type Store: StorageProvider;

    async fn connect(&self) -> Self::Store;
}

pub fn workflow_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn task(name: &str, seq: u32, data: serde_json::Value) -> NewWorkflowTask {
    NewWorkflowTask {
        task_name: name.to_string(),
        seq,
        status: Status::Pending,
        data: Some(data.to_string()),
    }
}

pub async fn inserts_workflow_and_tasks<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let id = workflow_id();

    let row = store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(id.clone()),
            vec![
                task("Task1", 0, serde_json::json!({"foo": "bar"})),
                task("Task2", 1, serde_json::json!({"baz": "qux"})),
            ],
        )
        .await
        .unwrap();

    assert_eq!(row.id, id);
    assert_eq!(row.status, Status::Pending);
    assert!(row.created_ms > 0);
    assert_eq!(row.created_ms, row.updated_ms);

    let tasks = store.workflow_tasks(&id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].task_name, "Task1");
    assert_eq!(tasks[0].data.as_deref(), Some(r#"{"foo":"bar"}"#));
    assert_eq!(tasks[1].seq, 1);
    assert!(tasks.iter().all(|t| t.status == Status::Pending && t.return_data.is_none()));
    assert!(tasks.iter().all(|t| t.created_ms == row.created_ms));
}

pub async fn insert_is_idempotent_on_workflow_id<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let id = workflow_id();

    let first = store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(id.clone()),
            vec![task("FirstWrite", 0, serde_json::json!(1))],
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;

    let second = store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(id.clone()),
            vec![
                task("Replacement", 0, serde_json::json!(2)),
                task("Extra", 1, serde_json::json!(3)),
            ],
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    let tasks = store.workflow_tasks(&id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_name, "FirstWrite");
}

pub async fn concurrent_inserts_write_once<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let id = workflow_id();
    let tasks = vec![
        task("ConcurrentTask", 0, serde_json::json!({"concurrent": "data"})),
        task("ConcurrentTask", 1, serde_json::json!({"concurrent": "more"})),
    ];

    let (a, b) = tokio::join!(
        store.insert_workflow_and_tasks(NewWorkflow::pending(id.clone()), tasks.clone()),
        store.insert_workflow_and_tasks(NewWorkflow::pending(id.clone()), tasks.clone()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.id, id);
    assert_eq!(b.id, id);
    assert_eq!(a.created_ms, b.created_ms);
    assert_eq!(store.workflow_tasks(&id).await.unwrap().len(), 2);
}

pub async fn lists_only_pending_workflows<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let pending = workflow_id();
    let done = workflow_id();

    for id in [&pending, &done] {
        store
            .insert_workflow_and_tasks(
                NewWorkflow::pending(id.clone()),
                vec![task("TestTask", 0, serde_json::json!({"test": "data"}))],
            )
            .await
            .unwrap();
    }
    store.update_workflow_status(&done, Status::Completed).await.unwrap();

    let rows = store.pending_workflows().await.unwrap();
    assert!(rows.iter().any(|w| w.id == pending));
    assert!(rows.iter().all(|w| w.id != done));
    assert!(rows.iter().all(|w| w.status == Status::Pending));
}

pub async fn next_task_is_lowest_pending_seq<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let id = workflow_id();
    let other = workflow_id();

    // Sequence numbers need not be contiguous nor inserted in order
    store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(id.clone()),
            vec![
                task("c", 9, serde_json::json!(null)),
                task("a", 2, serde_json::json!(null)),
                task("b", 5, serde_json::json!(null)),
            ],
        )
        .await
        .unwrap();
    store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(other.clone()),
            vec![task("elsewhere", 0, serde_json::json!(null))],
        )
        .await
        .unwrap();

    let next = store.next_workflow_task(&id).await.unwrap().unwrap();
    assert_eq!((next.workflow_id.as_str(), next.seq), (id.as_str(), 2));

    store
        .update_workflow_task_status(&id, 2, Status::Failed, TaskUpdate::failed("nope", None), None)
        .await
        .unwrap();
    let next = store.next_workflow_task(&id).await.unwrap().unwrap();
    assert_eq!(next.seq, 5);
    assert_eq!(next.task_name, "b");

    store
        .update_workflow_task_status(&id, 5, Status::Completed, TaskUpdate::default(), None)
        .await
        .unwrap();
    store
        .update_workflow_task_status(&id, 9, Status::Completed, TaskUpdate::default(), None)
        .await
        .unwrap();
    assert!(store.next_workflow_task(&id).await.unwrap().is_none());

    let untouched = store.next_workflow_task(&other).await.unwrap().unwrap();
    assert_eq!(untouched.seq, 0);
}

pub async fn task_update_stores_result_fields<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let id = workflow_id();
    store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(id.clone()),
            vec![
                task("Task1", 0, serde_json::json!({"foo": "bar"})),
                task("Task2", 1, serde_json::json!({"foo": "baz"})),
            ],
        )
        .await
        .unwrap();

    store
        .update_workflow_task_status(
            &id,
            0,
            Status::Completed,
            TaskUpdate::completed(Some(r#"{"result":"success"}"#.to_string())),
            None,
        )
        .await
        .unwrap();
    store
        .update_workflow_task_status(
            &id,
            1,
            Status::Failed,
            TaskUpdate::failed("card declined", Some(r#"{"code":51}"#.to_string())),
            None,
        )
        .await
        .unwrap();

    let tasks = store.workflow_tasks(&id).await.unwrap();
    assert_eq!(tasks[0].status, Status::Completed);
    assert_eq!(tasks[0].return_data.as_deref(), Some(r#"{"result":"success"}"#));
    assert_eq!(tasks[0].error, None);
    assert_eq!(tasks[1].status, Status::Failed);
    assert_eq!(tasks[1].error.as_deref(), Some("card declined"));
    assert_eq!(tasks[1].return_data.as_deref(), Some(r#"{"code":51}"#));

    // Task writes alone never move the workflow
    let workflow = store.get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, Status::Pending);
}

pub async fn task_and_workflow_update_together<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let id = workflow_id();
    store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(id.clone()),
            vec![
                task("Task1", 0, serde_json::json!(null)),
                task("Task2", 1, serde_json::json!(null)),
            ],
        )
        .await
        .unwrap();

    store
        .update_workflow_task_status(
            &id,
            0,
            Status::Failed,
            TaskUpdate::failed("fatal", None),
            Some(Status::Failed),
        )
        .await
        .unwrap();

    let workflow = store.get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, Status::Failed);
    let tasks = store.workflow_tasks(&id).await.unwrap();
    assert_eq!(tasks[0].status, Status::Failed);
    assert_eq!(tasks[1].status, Status::Pending);

    // Unknown task: neither row changes
    let err = store
        .update_workflow_task_status(
            &id,
            42,
            Status::Completed,
            TaskUpdate::default(),
            Some(Status::Completed),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    let workflow = store.get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, Status::Failed);
}

pub async fn updating_missing_rows_is_not_found<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let id = workflow_id();

    let err = store.update_workflow_status(&id, Status::Completed).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));

    let err = store
        .update_workflow_task_status(&id, 0, Status::Completed, TaskUpdate::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    assert!(store.get_workflow(&id).await.unwrap().is_none());
}

pub async fn deletes_old_rows_regardless_of_status<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let old_pending = workflow_id();
    let old_completed = workflow_id();
    let fresh = workflow_id();

    for id in [&old_pending, &old_completed] {
        store
            .insert_workflow_and_tasks(
                NewWorkflow::pending(id.clone()),
                vec![task("OldTask", 0, serde_json::json!({"old": "data"}))],
            )
            .await
            .unwrap();
    }
    store
        .update_workflow_status(&old_completed, Status::Completed)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(fresh.clone()),
            vec![task("NewTask", 0, serde_json::json!({"new": "data"}))],
        )
        .await
        .unwrap();

    let deleted = store.delete_old_workflows_and_tasks(150).await.unwrap();
    assert_eq!(deleted, 2);

    for id in [&old_pending, &old_completed] {
        assert!(store.get_workflow(id).await.unwrap().is_none());
        assert!(store.workflow_tasks(id).await.unwrap().is_empty());
    }
    assert!(store.get_workflow(&fresh).await.unwrap().is_some());
    assert_eq!(store.workflow_tasks(&fresh).await.unwrap().len(), 1);
}

pub async fn huge_age_deletes_nothing<F: Fixture>(fixture: F) {
    let store = fixture.connect().await;
    let old = workflow_id();
    store
        .insert_workflow_and_tasks(
            NewWorkflow::pending(old.clone()),
            vec![task("OldTask", 0, serde_json::json!(1))],
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fresh = workflow_id();
    store
        .insert_workflow_and_tasks(NewWorkflow::pending(fresh.clone()), vec![])
        .await
        .unwrap();

    for age in [u64::MAX, 1 << 63, i64::MAX as u64] {
        assert_eq!(store.delete_old_workflows_and_tasks(age).await.unwrap(), 0);
    }
    assert!(store.get_workflow(&old).await.unwrap().is_some());
    assert_eq!(store.workflow_tasks(&old).await.unwrap().len(), 1);
    assert!(store.get_workflow(&fresh).await.unwrap().is_some());
}

pub async fn resumes_after_restart<F: Fixture>(fixture: F) {
    let id = workflow_id();
    {
        let store = fixture.connect().await;
        store
            .insert_workflow_and_tasks(
                NewWorkflow::pending(id.clone()),
                vec![
                    task("Task1", 0, serde_json::json!({"foo": "bar"})),
                    task("Task2", 1, serde_json::json!({"baz": "qux"})),
                ],
            )
            .await
            .unwrap();
        store
            .update_workflow_task_status(
                &id,
                0,
                Status::Completed,
                TaskUpdate::completed(Some(r#""Task1 completed""#.to_string())),
                None,
            )
            .await
            .unwrap();
    }

    let restarted = fixture.connect().await;
    let pending = restarted.pending_workflows().await.unwrap();
    let resumed = pending.iter().find(|w| w.id == id).unwrap();
    assert_eq!(resumed.status, Status::Pending);

    let next = restarted.next_workflow_task(&id).await.unwrap().unwrap();
    assert_eq!(next.seq, 1);
    assert_eq!(next.task_name, "Task2");
    assert_eq!(next.status, Status::Pending);
}

/// Expand the whole contract suite for a fixture expression.
macro_rules! storage_contract_tests {
    ($fixture:expr) => {
        #[tokio::test]
        async fn inserts_workflow_and_tasks() {
            support::inserts_workflow_and_tasks($fixture).await;
        }

        #[tokio::test]
        async fn insert_is_idempotent_on_workflow_id() {
            support::insert_is_idempotent_on_workflow_id($fixture).await;
        }

        #[tokio::test]
        async fn concurrent_inserts_write_once() {
            support::concurrent_inserts_write_once($fixture).await;
        }

        #[tokio::test]
        async fn lists_only_pending_workflows() {
            support::lists_only_pending_workflows($fixture).await;
        }

        #[tokio::test]
        async fn next_task_is_lowest_pending_seq() {
            support::next_task_is_lowest_pending_seq($fixture).await;
        }

        #[tokio::test]
        async fn task_update_stores_result_fields() {
            support::task_update_stores_result_fields($fixture).await;
        }

        #[tokio::test]
        async fn task_and_workflow_update_together() {
            support::task_and_workflow_update_together($fixture).await;
        }

        #[tokio::test]
        async fn updating_missing_rows_is_not_found() {
            support::updating_missing_rows_is_not_found($fixture).await;
        }

        #[tokio::test]
        async fn deletes_old_rows_regardless_of_status() {
            support::deletes_old_rows_regardless_of_status($fixture).await;
        }

        #[tokio::test]
        async fn huge_age_deletes_nothing() {
            support::huge_age_deletes_nothing($fixture).await;
        }

        #[tokio::test]
        async fn resumes_after_restart() {
            support::resumes_after_restart($fixture).await;
        }
    };
}
