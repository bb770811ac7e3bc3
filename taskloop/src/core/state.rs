//! Session state owned by the agent loop for the lifetime of one run.
//!
//! Fields are private: every mutation goes through a method that upholds the
//! data model rules (plans are replaced wholesale, results and reflections are
//! append-only, confidence stays in `[0, 1]`).

use serde::Serialize;
use serde_json::Value;

use crate::core::invariants::InvariantViolation;
use crate::core::selector::{NextTask, next_task};
use crate::core::types::{Decision, ReflectionRecord, SessionStatus, TaskResult, clamp_unit};

/// Number of most recent task results shown to the controller.
pub const RECENT_TASK_WINDOW: usize = 3;
/// Number of most recent reflections shown to the controller.
pub const RECENT_REFLECTION_WINDOW: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    objective: String,
    plan: Vec<String>,
    completed_tasks: Vec<TaskResult>,
    reflections: Vec<ReflectionRecord>,
    confidence_score: f64,
    replan_count: u32,
    planning_rounds: u32,
    status: SessionStatus,
}

/// Serialized view of the state handed to the controller prompt.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot<'a> {
    pub objective: &'a str,
    pub plan: &'a [String],
    pub completed_tasks: &'a [TaskResult],
    pub reflection_history: Vec<String>,
    pub replan_count: u32,
    pub confidence_score: f64,
    pub status: SessionStatus,
    pub progress: String,
}

impl SessionState {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            plan: Vec::new(),
            completed_tasks: Vec::new(),
            reflections: Vec::new(),
            confidence_score: 0.0,
            replan_count: 0,
            planning_rounds: 0,
            status: SessionStatus::Initializing,
        }
    }

    pub fn objective(&self) -> &str {
        &self.objective
    }

    pub fn plan(&self) -> &[String] {
        &self.plan
    }

    pub fn completed_tasks(&self) -> &[TaskResult] {
        &self.completed_tasks
    }

    pub fn reflections(&self) -> &[ReflectionRecord] {
        &self.reflections
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn replan_count(&self) -> u32 {
        self.replan_count
    }

    /// Successful plan generations so far (initial, bootstrap and revisions).
    pub fn planning_rounds(&self) -> u32 {
        self.planning_rounds
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Next unexecuted task, using the completed count as the plan cursor.
    pub fn next_task(&self) -> NextTask<'_> {
        next_task(&self.plan, self.completed_tasks.len())
    }

    /// `"done/total"`, or `"0/0"` before any plan exists.
    pub fn progress(&self) -> String {
        if self.plan.is_empty() {
            return "0/0".to_string();
        }
        format!("{}/{}", self.completed_tasks.len(), self.plan.len())
    }

    /// Fold the controller's decision into the state.
    pub fn record_decision(&mut self, decision: &Decision) {
        self.confidence_score = clamp_unit(decision.confidence);
        self.status = SessionStatus::for_action(&decision.action);
    }

    /// Replace the plan wholesale. Revisions also bump the replan counter.
    ///
    /// Completed tasks are kept as-is, so after a revision the cursor may
    /// point into an unrelated task list.
    pub fn replace_plan(&mut self, plan: Vec<String>, revision: bool) {
        self.plan = plan;
        self.planning_rounds += 1;
        if revision {
            self.replan_count += 1;
        }
    }

    /// Append an execution record for the task at the current cursor.
    pub fn record_result(&mut self, result: TaskResult) -> Result<(), InvariantViolation> {
        if self.completed_tasks.len() >= self.plan.len() {
            return Err(InvariantViolation(format!(
                "cannot record task {} of a {}-task plan",
                self.completed_tasks.len() + 1,
                self.plan.len()
            )));
        }
        self.completed_tasks.push(result);
        Ok(())
    }

    /// Append a reflection and apply its confidence delta.
    pub fn record_reflection(&mut self, record: ReflectionRecord, confidence_adjustment: f64) {
        self.reflections.push(record);
        self.adjust_confidence(confidence_adjustment);
    }

    /// Add `delta` to the confidence score, clamped to `[0, 1]`.
    pub fn adjust_confidence(&mut self, delta: f64) {
        if !delta.is_finite() {
            return;
        }
        self.confidence_score = clamp_unit(self.confidence_score + delta);
    }

    pub fn finish(&mut self, status: SessionStatus) {
        self.status = status;
    }

    /// Reflection history in its opaque text form.
    pub fn reflection_history(&self) -> serde_json::Result<Vec<String>> {
        self.reflections.iter().map(ReflectionRecord::to_text).collect()
    }

    pub fn snapshot(&self) -> serde_json::Result<StateSnapshot<'_>> {
        Ok(StateSnapshot {
            objective: &self.objective,
            plan: &self.plan,
            completed_tasks: &self.completed_tasks,
            reflection_history: self.reflection_history()?,
            replan_count: self.replan_count,
            confidence_score: self.confidence_score,
            status: self.status,
            progress: self.progress(),
        })
    }

    /// Bounded window of recent signal: the last task results followed by the
    /// last reflections (as text).
    pub fn recent_history(&self) -> serde_json::Result<Vec<Value>> {
        let tasks_from = self.completed_tasks.len().saturating_sub(RECENT_TASK_WINDOW);
        let reflections_from = self
            .reflections
            .len()
            .saturating_sub(RECENT_REFLECTION_WINDOW);

        let mut window = Vec::new();
        for result in &self.completed_tasks[tasks_from..] {
            window.push(serde_json::to_value(result)?);
        }
        for record in &self.reflections[reflections_from..] {
            window.push(Value::String(record.to_text()?));
        }
        Ok(window)
    }
}
