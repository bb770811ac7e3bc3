//! Plan generator: turns the objective into an ordered list of tasks.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::sanitize::{Decoded, PayloadKind};
use crate::core::state::SessionState;
use crate::core::types::{PlanOutput, TaskResult};
use crate::io::completion::CompletionService;
use crate::io::prompt::PromptBuilder;

use super::{AgentSettings, request_payload};

/// What the planner is told about progress so far.
#[derive(Debug, Clone, Serialize)]
pub struct PlanningContext<'a> {
    pub completed_tasks: &'a [TaskResult],
    pub reflections: Vec<String>,
    pub replan_count: u32,
}

impl<'a> PlanningContext<'a> {
    pub fn from_state(state: &'a SessionState) -> serde_json::Result<Self> {
        Ok(Self {
            completed_tasks: state.completed_tasks(),
            reflections: state.reflection_history()?,
            replan_count: state.replan_count(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlanGenerator {
    settings: AgentSettings,
}

impl PlanGenerator {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    /// Ask for a fresh plan, or a revision of the current one.
    #[instrument(skip_all, fields(revision = revision))]
    pub fn generate<S: CompletionService>(
        &self,
        service: &S,
        objective: &str,
        context: &PlanningContext<'_>,
        revision: bool,
    ) -> Result<Decoded<PlanOutput>> {
        let context = serde_json::to_string(context).context("serialize planning context")?;
        let request = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build_planner(objective, &context, revision)?
            .into_request("planner", self.settings.temperature);

        let decoded: Decoded<PlanOutput> = request_payload(service, &request, PayloadKind::Plan)?;
        if let Decoded::Parsed(output) = &decoded {
            debug!(
                tasks = output.plan.len(),
                difficulty = %output.estimated_difficulty,
                "plan generated"
            );
        }
        Ok(decoded)
    }
}
