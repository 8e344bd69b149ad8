// crates/taskcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskcore::{ExecutionEvent, StorageProvider, TaskSpec, WorkflowRow};
use taskruntime::{wait_all, DriverExit, RuntimeConfig, TaskRegistry, WorkflowRunner};
use taskstore::SqliteStorage;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskflow")]
#[command(about = "Durable task workflow CLI", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "TASKFLOW_DB", default_value = "taskflow.db", global = true)]
    db: PathBuf,

    /// Pause before retrying a task that failed unexpectedly
    #[arg(long, default_value_t = 1000, global = true)]
    retry_delay_ms: u64,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a workflow and run it to the end
    Submit {
        /// Workflow id; submitting an existing id does nothing
        #[arg(long)]
        id: String,

        /// JSON array of `{ "name": ..., "data": ... }`
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Resume every pending workflow and wait for them
    Run,

    /// List pending workflows
    List,

    /// Show the tasks of one workflow
    Tasks {
        #[arg(long)]
        id: String,
    },

    /// Delete workflows created more than the given age ago
    Prune {
        #[arg(long)]
        older_than_ms: u64,
    },

    /// List available task runners
    Runners,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    name: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl From<TaskEntry> for TaskSpec {
    fn from(entry: TaskEntry) -> Self {
        TaskSpec {
            name: entry.name,
            data: entry.data.map(|v| v.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match &cli.command {
        Commands::Runners => {
            list_runners();
            return Ok(());
        }
        Commands::List => return list_pending(&cli).await,
        Commands::Tasks { id } => return show_tasks(&cli, id).await,
        _ => {}
    }

    let runner = start_runner(&cli).await?;
    match cli.command {
        Commands::Submit { id, file } => submit_workflow(&runner, id, file).await?,
        Commands::Run => run_pending(&runner).await?,
        Commands::Prune { older_than_ms } => {
            let deleted = runner
                .sweep_expired(Duration::from_millis(older_than_ms))
                .await?;
            println!("🧹 Deleted {} workflow(s)", deleted);
        }
        Commands::Runners | Commands::List | Commands::Tasks { .. } => {}
    }
    runner.shutdown().await?;

    Ok(())
}

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    tasklib::register_all(&mut registry);
    registry
}

async fn open_storage(cli: &Cli) -> Result<Arc<dyn StorageProvider>> {
    tracing::debug!(db = %cli.db.display(), "opening database");
    let storage = SqliteStorage::open(&cli.db)
        .with_context(|| format!("failed to open database {}", cli.db.display()))?;
    storage.init().await?;
    Ok(Arc::new(storage))
}

async fn start_runner(cli: &Cli) -> Result<WorkflowRunner> {
    let storage = open_storage(cli).await?;
    let config = RuntimeConfig::default().with_retry_delay(Duration::from_millis(cli.retry_delay_ms));
    Ok(WorkflowRunner::start(config, Arc::new(registry()), storage).await?)
}

/// Print events as they arrive until aborted
fn spawn_event_printer(runner: &WorkflowRunner) -> JoinHandle<()> {
    let mut events = runner.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { workflow_id, .. } => {
                    println!("▶️  Workflow {} started", workflow_id);
                }
                ExecutionEvent::TaskStarted { seq, task_name, attempt, .. } => {
                    if attempt > 0 {
                        println!("  ⚡ Task {} ({}) attempt {}", seq, task_name, attempt + 1);
                    } else {
                        println!("  ⚡ Task {} ({})", seq, task_name);
                    }
                }
                ExecutionEvent::TaskCompleted { seq, duration_ms, .. } => {
                    println!("  ✅ Task {} completed in {}ms", seq, duration_ms);
                }
                ExecutionEvent::TaskFailed { seq, error, .. } => {
                    println!("  ❌ Task {} failed: {}", seq, error);
                }
                ExecutionEvent::TaskRetrying { seq, error, .. } => {
                    println!("  🔁 Task {} will retry: {}", seq, error);
                }
                ExecutionEvent::WorkflowCompleted { workflow_id, .. } => {
                    println!("✨ Workflow {} completed", workflow_id);
                }
                ExecutionEvent::WorkflowFailed { workflow_id, seq, .. } => {
                    println!("💥 Workflow {} failed at task {}", workflow_id, seq);
                }
                ExecutionEvent::WorkflowStalled { workflow_id, task_name, .. } => {
                    println!("⏸️  Workflow {} waiting for task runner '{}'", workflow_id, task_name);
                }
                ExecutionEvent::RetentionSwept { .. } => {}
            }
        }
    })
}

async fn submit_workflow(runner: &WorkflowRunner, id: String, file: PathBuf) -> Result<()> {
    println!("🚀 Loading tasks from: {}", file.display());

    let json = std::fs::read_to_string(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let entries: Vec<TaskEntry> = serde_json::from_str(&json)?;
    let tasks: Vec<TaskSpec> = entries.into_iter().map(TaskSpec::from).collect();

    println!("📋 Workflow: {}", id);
    println!("   Tasks: {}", tasks.len());
    println!();

    let printer = spawn_event_printer(runner);
    let handle = runner.submit(id, tasks).await?;
    let exit = handle.wait().await;

    // Let the printer drain
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    println!();
    report_exit(exit?);
    Ok(())
}

async fn run_pending(runner: &WorkflowRunner) -> Result<()> {
    let printer = spawn_event_printer(runner);
    let handles = runner.recover().await?;
    if handles.is_empty() {
        println!("Nothing to do, no pending workflows");
    }

    let ids: Vec<String> = handles.iter().map(|h| h.workflow_id().to_string()).collect();
    let results = wait_all(handles).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    if !ids.is_empty() {
        println!();
        println!("📊 Summary:");
    }
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(exit) => println!("   {}: {}", id, describe_exit(&exit)),
            Err(e) => println!("   {}: error: {}", id, e),
        }
    }
    Ok(())
}

fn describe_exit(exit: &DriverExit) -> String {
    match exit {
        DriverExit::Completed => "completed".to_string(),
        DriverExit::Failed { seq } => format!("failed at task {}", seq),
        DriverExit::MissingRunner { seq, task_name } => {
            format!("pending, task {} needs runner '{}'", seq, task_name)
        }
        DriverExit::AlreadyTerminal(status) => format!("already {}", status),
        DriverExit::Missing => "not found".to_string(),
    }
}

fn report_exit(exit: DriverExit) {
    println!("📊 Result: {}", describe_exit(&exit));
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

async fn list_pending(cli: &Cli) -> Result<()> {
    let storage = open_storage(cli).await?;
    let mut workflows: Vec<WorkflowRow> = storage.pending_workflows().await?;
    workflows.sort_by_key(|w| w.created_ms);

    if workflows.is_empty() {
        println!("No pending workflows");
        return Ok(());
    }
    println!("⏳ Pending workflows:");
    for workflow in workflows {
        println!("  • {} (created {})", workflow.id, format_ms(workflow.created_ms));
    }
    Ok(())
}

async fn show_tasks(cli: &Cli, id: &str) -> Result<()> {
    let storage = open_storage(cli).await?;
    let Some(workflow) = storage.get_workflow(id).await? else {
        anyhow::bail!("workflow '{}' not found", id);
    };

    println!("📋 Workflow {} [{}]", workflow.id, workflow.status);
    for task in storage.workflow_tasks(id).await? {
        println!("  {:>3}. {} [{}]", task.seq, task.task_name, task.status);
        if let Some(data) = &task.data {
            println!("       input:  {}", data);
        }
        if let Some(ret) = &task.return_data {
            println!("       return: {}", ret);
        }
        if let Some(error) = &task.error {
            println!("       error:  {}", error);
        }
    }
    Ok(())
}

fn list_runners() {
    println!("📦 Available task runners:");
    println!();
    for name in registry().list_task_names() {
        println!("  • {}", name);
    }
}
