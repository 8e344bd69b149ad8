use async_trait::async_trait;
use serde::Deserialize;
use taskcore::{RunnerError, TaskContext, TaskOutcome, TaskRunner};
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

#[derive(Debug, Default, Deserialize)]
struct DelayInput {
    delay_ms: Option<u64>,
}

/// Sleeps for `delay_ms` (default one second) and passes its input through
pub struct DelayTask;

#[async_trait]
impl TaskRunner for DelayTask {
    fn name(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutcome, RunnerError> {
        let input: DelayInput = ctx.input()?.unwrap_or_default();
        let delay_ms = input.delay_ms.unwrap_or(DEFAULT_DELAY_MS);

        tracing::info!(workflow_id = %ctx.workflow_id, seq = ctx.seq, "Delaying for {}ms", delay_ms);
        sleep(Duration::from_millis(delay_ms)).await;

        Ok(TaskOutcome::Completed { data: ctx.data })
    }
}
