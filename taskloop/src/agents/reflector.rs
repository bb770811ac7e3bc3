//! Reflector: advisory self-assessment over the execution history.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::sanitize::{Decoded, PayloadKind};
use crate::core::types::{ReflectionOutput, TaskResult};
use crate::io::completion::CompletionService;
use crate::io::prompt::PromptBuilder;

use super::{AgentSettings, request_payload};

#[derive(Debug, Clone)]
pub struct Reflector {
    settings: AgentSettings,
}

impl Reflector {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }

    /// Assess `history` against the plan. Callers skip this when there is no
    /// history to reflect on.
    #[instrument(skip_all, fields(history = history.len(), plan = plan.len()))]
    pub fn reflect<S: CompletionService>(
        &self,
        service: &S,
        history: &[TaskResult],
        plan: &[String],
        objective: &str,
    ) -> Result<Decoded<ReflectionOutput>> {
        let history = serde_json::to_string(history).context("serialize execution history")?;
        let plan = serde_json::to_string(plan).context("serialize plan")?;
        let request = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build_reflector(objective, &plan, &history)?
            .into_request("reflector", self.settings.temperature);

        let decoded: Decoded<ReflectionOutput> =
            request_payload(service, &request, PayloadKind::Reflection)?;
        if let Decoded::Parsed(output) = &decoded {
            debug!(
                confidence_adjustment = output.confidence_adjustment,
                should_replan = output.should_replan,
                patterns = output.patterns.len(),
                "reflection decoded"
            );
        }
        Ok(decoded)
    }
}
