//! Controllers pick the next action for the agent loop.
//!
//! [`LlmController`] asks the completion service. [`SequentialController`]
//! walks the plan in order without any completion calls.

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::sanitize::PayloadKind;
use crate::core::selector::NextTask;
use crate::core::state::SessionState;
use crate::core::types::{Action, Decision};
use crate::io::completion::CompletionService;
use crate::io::prompt::PromptBuilder;

use super::{AgentSettings, request_payload};

/// Chooses one action per iteration from the current session state.
pub trait Controller {
    fn decide<S: CompletionService>(&self, service: &S, state: &SessionState) -> Result<Decision>;
}

/// Controller backed by the completion service.
#[derive(Debug, Clone)]
pub struct LlmController {
    settings: AgentSettings,
}

impl LlmController {
    pub fn new(settings: AgentSettings) -> Self {
        Self { settings }
    }
}

impl Controller for LlmController {
    #[instrument(skip_all, fields(progress = %state.progress()))]
    fn decide<S: CompletionService>(&self, service: &S, state: &SessionState) -> Result<Decision> {
        let snapshot = state.snapshot().context("serialize session state")?;
        let snapshot = serde_json::to_string_pretty(&snapshot).context("serialize session state")?;
        let recent = state.recent_history().context("serialize recent history")?;
        let recent = if recent.is_empty() {
            String::new()
        } else {
            serde_json::to_string_pretty(&recent).context("serialize recent history")?
        };

        let request = PromptBuilder::new(self.settings.prompt_budget_bytes)
            .build_controller(&snapshot, &recent)?
            .into_request("controller", self.settings.temperature);

        let decision = request_payload::<_, Decision>(service, &request, PayloadKind::Decision)?
            .or_else(|raw, failure| {
                warn!(error = %failure, bytes = raw.len(), "controller output unreadable, reflecting");
                Decision::fallback()
            });
        debug!(action = %decision.action, "controller decided");
        Ok(decision)
    }
}

/// Fixed plan-then-execute policy: execute until the plan runs out, then complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialController;

impl Controller for SequentialController {
    fn decide<S: CompletionService>(&self, _service: &S, state: &SessionState) -> Result<Decision> {
        if state.planning_rounds() == 0 {
            return Ok(Decision::new(Action::Execute, "no plan yet", 1.0));
        }
        let decision = match state.next_task() {
            NextTask::Ready { index, .. } => Decision::new(
                Action::Execute,
                format!("task {} of {} is next", index + 1, state.plan().len()),
                1.0,
            ),
            NextTask::Exhausted => Decision::new(Action::Complete, "every planned task has run", 1.0),
            NextTask::Unplanned => Decision::new(Action::Complete, "planning produced no tasks", 1.0),
        };
        Ok(decision)
    }
}
