//! Task executor: carries out one plan step and reports on it.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::sanitize::{Decoded, PayloadKind};
use crate::core::types::{ExecutionOutput, TaskResult};
use crate::io::completion::CompletionService;
use crate::io::prompt::PromptBuilder;

use super::{AgentSettings, request_payload};

/// What the executor sees besides the task itself.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext<'a> {
    pub completed_tasks: &'a [TaskResult],
    pub remaining_tasks: &'a [String],
    pub objective: &'a str,
}

#[derive(Debug, Clone)]
pub struct TaskExecutor {
    settings: AgentSettings,
}

impl TaskExecutor {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    #[instrument(skip_all, fields(remaining = context.remaining_tasks.len()))]
    pub fn execute<S: CompletionService>(
        &self,
        service: &S,
        task: &str,
        context: &ExecutionContext<'_>,
    ) -> Result<Decoded<ExecutionOutput>> {
        let serialized = serde_json::to_string(context).context("serialize execution context")?;
        let request = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build_executor(task, context.objective, &serialized)?
            .into_request("executor", self.settings.temperature);

        let decoded: Decoded<ExecutionOutput> =
            request_payload(service, &request, PayloadKind::Execution)?;
        if let Decoded::Parsed(output) = &decoded {
            debug!(quality_score = output.quality_score, "task executed");
        }
        Ok(decoded)
    }
}
