//! The agent loop: ask the controller, dispatch the action, repeat.
//!
//! The loop stops when the controller chooses `complete` or the iteration
//! budget runs out. Nothing else ends a session early except a completion
//! service failure or a broken state invariant, both returned as errors.

use anyhow::{Context, Result, ensure};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::AgentSettings;
use crate::agents::controller::{Controller, LlmController};
use crate::agents::executor::{ExecutionContext, TaskExecutor};
use crate::agents::planner::{PlanGenerator, PlanningContext};
use crate::agents::reflector::Reflector;
use crate::core::invariants::validate_invariants;
use crate::core::selector::{NextTask, remaining_after};
use crate::core::state::SessionState;
use crate::core::types::{Action, Decision, ReflectionRecord, SessionStatus, TaskResult};
use crate::io::completion::{CompletionService, Profile};
use crate::io::config::AgentConfig;

pub const DEFAULT_MAX_ITERATIONS: u32 = 20;
pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 40_000;

/// Loop limits and per-profile sampling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub max_iterations: u32,
    pub prompt_budget_bytes: usize,
    pub planning_temperature: f32,
    pub execution_temperature: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
            planning_temperature: 0.0,
            execution_temperature: 0.3,
        }
    }
}

impl From<&AgentConfig> for SessionConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            prompt_budget_bytes: config.prompt_budget_bytes,
            planning_temperature: config.completion.temperature(Profile::Deterministic),
            execution_temperature: config.completion.temperature(Profile::Creative),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_iterations > 0, "max_iterations must be > 0");
        ensure!(self.prompt_budget_bytes > 0, "prompt_budget_bytes must be > 0");
        Ok(())
    }

    pub fn agent_settings(&self, profile: Profile) -> AgentSettings {
        let temperature = match profile {
            Profile::Deterministic => self.planning_temperature,
            Profile::Creative => self.execution_temperature,
        };
        AgentSettings {
            prompt_budget_bytes: self.prompt_budget_bytes,
            temperature,
        }
    }
}

/// What one iteration did to the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IterationEffect {
    /// A plan was generated and replaced the previous one.
    Planned { tasks: usize, revision: bool },
    /// Planner output was unreadable; the previous plan stays.
    PlanRetained { revision: bool },
    /// Task at `index` ran and its result was recorded.
    Executed {
        index: usize,
        quality_score: f64,
        structured: bool,
    },
    /// Every planned task already has a result; nothing ran.
    AllTasksDone,
    ReflectionRecorded { should_replan: bool, confidence: f64 },
    /// No history yet, or reflector output was unreadable.
    ReflectionSkipped,
    Completed,
}

/// Passed to the `on_iteration` callback after every dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationReport {
    pub iteration: u32,
    pub decision: Decision,
    pub effect: IterationEffect,
}

/// Final record of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub objective: String,
    pub completed_tasks: Vec<TaskResult>,
    pub reflections: Vec<String>,
    pub final_confidence: f64,
    pub iterations_used: u32,
    pub status: SessionStatus,
    pub plan: Vec<String>,
    pub replan_count: u32,
}

impl SessionOutcome {
    fn from_state(state: SessionState, iterations_used: u32) -> Result<Self> {
        let reflections = state
            .reflection_history()
            .context("serialize reflection history")?;
        Ok(Self {
            objective: state.objective().to_string(),
            completed_tasks: state.completed_tasks().to_vec(),
            reflections,
            final_confidence: state.confidence_score(),
            iterations_used,
            status: state.status(),
            plan: state.plan().to_vec(),
            replan_count: state.replan_count(),
        })
    }
}

/// Run a session with the LLM controller and default settings, apart from
/// the iteration budget.
pub fn run<S: CompletionService>(
    service: &S,
    objective: &str,
    max_iterations: u32,
) -> Result<SessionOutcome> {
    let config = SessionConfig {
        max_iterations,
        ..SessionConfig::default()
    };
    let controller = LlmController::new(config.agent_settings(Profile::Deterministic));
    run_session(service, &controller, objective, &config, |_| {})
}

/// Run one session to completion or budget exhaustion.
#[instrument(skip_all, fields(max_iterations = config.max_iterations))]
pub fn run_session<S, C, F>(
    service: &S,
    controller: &C,
    objective: &str,
    config: &SessionConfig,
    mut on_iteration: F,
) -> Result<SessionOutcome>
where
    S: CompletionService,
    C: Controller,
    F: FnMut(&IterationReport),
{
    config.validate()?;
    let objective = objective.trim();
    ensure!(!objective.is_empty(), "objective must not be empty");

    let agents = Agents::new(config);
    let mut state = SessionState::new(objective);
    let mut iterations_used = 0u32;

    while iterations_used < config.max_iterations {
        iterations_used += 1;
        let iteration = iterations_used;

        let decision = controller
            .decide(service, &state)
            .with_context(|| format!("controller decision (iteration {iteration})"))?;
        info!(
            iteration,
            action = %decision.action,
            confidence = decision.confidence,
            urgency = ?decision.urgency,
            "decision"
        );
        state.record_decision(&decision);

        let effect = agents
            .dispatch(service, &mut state, &decision.action)
            .with_context(|| format!("{} (iteration {iteration})", decision.action))?;

        for violation in validate_invariants(&state) {
            warn!(iteration, %violation, "session state invariant violated");
        }
        debug!(iteration, progress = %state.progress(), ?effect, "iteration finished");

        let completed = effect == IterationEffect::Completed;
        on_iteration(&IterationReport {
            iteration,
            decision,
            effect,
        });
        if completed {
            info!(iteration, "objective completed");
            return SessionOutcome::from_state(state, iterations_used);
        }
    }

    state.finish(SessionStatus::MaxIterationsReached);
    info!(iterations_used, "iteration budget exhausted");
    SessionOutcome::from_state(state, iterations_used)
}

/// The three action handlers, built once per session.
struct Agents {
    planner: PlanGenerator,
    executor: TaskExecutor,
    reflector: Reflector,
}

impl Agents {
    fn new(config: &SessionConfig) -> Self {
        Self {
            planner: PlanGenerator::new(config.agent_settings(Profile::Deterministic)),
            executor: TaskExecutor::new(config.agent_settings(Profile::Creative)),
            reflector: Reflector::new(config.agent_settings(Profile::Creative)),
        }
    }

    fn dispatch<S: CompletionService>(
        &self,
        service: &S,
        state: &mut SessionState,
        action: &Action,
    ) -> Result<IterationEffect> {
        match action {
            Action::Plan => self.plan(service, state, false),
            Action::Replan => self.plan(service, state, true),
            Action::Execute => self.execute(service, state),
            Action::Reflect => self.reflect(service, state),
            Action::Complete => {
                state.finish(SessionStatus::Completed);
                Ok(IterationEffect::Completed)
            }
            Action::Unrecognized(label) => {
                warn!(action = %label, "unrecognized action, reflecting instead");
                self.reflect(service, state)
            }
        }
    }

    fn plan<S: CompletionService>(
        &self,
        service: &S,
        state: &mut SessionState,
        revision: bool,
    ) -> Result<IterationEffect> {
        let decoded = {
            let context = PlanningContext::from_state(state).context("serialize planning context")?;
            self.planner
                .generate(service, state.objective(), &context, revision)?
        };
        match decoded.parsed() {
            Some(output) => {
                let tasks = output.plan.len();
                state.replace_plan(output.plan, revision);
                info!(tasks, revision, "plan replaced");
                Ok(IterationEffect::Planned { tasks, revision })
            }
            None => {
                warn!(revision, kept = state.plan().len(), "keeping previous plan");
                Ok(IterationEffect::PlanRetained { revision })
            }
        }
    }

    fn execute<S: CompletionService>(
        &self,
        service: &S,
        state: &mut SessionState,
    ) -> Result<IterationEffect> {
        let (index, task) = match state.next_task() {
            NextTask::Unplanned => {
                debug!("no plan to execute, planning first");
                return self.plan(service, state, false);
            }
            NextTask::Exhausted => {
                debug!(progress = %state.progress(), "all planned tasks done");
                return Ok(IterationEffect::AllTasksDone);
            }
            NextTask::Ready { index, task } => (index, task.to_string()),
        };

        let decoded = {
            let context = ExecutionContext {
                completed_tasks: state.completed_tasks(),
                remaining_tasks: remaining_after(state.plan(), index),
                objective: state.objective(),
            };
            self.executor.execute(service, &task, &context)?
        };
        let structured = decoded.is_parsed();
        let result = decoded
            .map(|output| TaskResult::from_output(&task, output))
            .or_else(|raw, _| TaskResult::unstructured(&task, raw));
        let quality_score = result.quality_score;

        state.record_result(result)?;
        info!(task = index + 1, quality_score, structured, "task recorded");
        Ok(IterationEffect::Executed {
            index,
            quality_score,
            structured,
        })
    }

    fn reflect<S: CompletionService>(
        &self,
        service: &S,
        state: &mut SessionState,
    ) -> Result<IterationEffect> {
        if state.completed_tasks().is_empty() {
            debug!("no execution history, skipping reflection");
            return Ok(IterationEffect::ReflectionSkipped);
        }

        let decoded = self.reflector.reflect(
            service,
            state.completed_tasks(),
            state.plan(),
            state.objective(),
        )?;
        let Some(output) = decoded.parsed() else {
            return Ok(IterationEffect::ReflectionSkipped);
        };

        let record = ReflectionRecord::from(&output);
        let should_replan = record.should_replan;
        state.record_reflection(record, output.confidence_adjustment);
        info!(
            should_replan,
            confidence = state.confidence_score(),
            "reflection recorded"
        );
        Ok(IterationEffect::ReflectionRecorded {
            should_replan,
            confidence: state.confidence_score(),
        })
    }
}
