use async_trait::async_trait;
use serde_json::{json, Value};
use taskcore::{RunnerError, TaskContext, TaskOutcome, TaskRunner};

/// Logs its input and returns the message
pub struct LogTask;

#[async_trait]
impl TaskRunner for LogTask {
    fn name(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutcome, RunnerError> {
        let input: Option<Value> = ctx.input()?;
        let message = input
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(workflow_id = %ctx.workflow_id, seq = ctx.seq, "DEBUG: {}", message);
        if let Some(Value::Object(fields)) = &input {
            for (key, value) in fields {
                tracing::debug!("  {}: {}", key, value);
            }
        }

        TaskOutcome::completed_with(&json!({ "message": message }))
    }
}
