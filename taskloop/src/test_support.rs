//! Test-only helpers: a scripted completion service and payload builders.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::Result;
use serde_json::json;

use crate::core::types::{ReflectionRecord, TaskResult};
use crate::io::completion::{CompletionError, CompletionRequest, CompletionService};

/// Replays canned completions in order and records every request.
///
/// Once the script runs out, every call fails with a network error.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    responses: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new<I, T>(responses: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CompletionError::Network("script exhausted".to_string()).into())
    }
}

/// Controller response choosing `action`.
pub fn decision_json(action: &str, confidence: f64) -> String {
    json!({
        "action": action,
        "reasoning": format!("{action} next"),
        "confidence": confidence,
        "urgency": "medium",
    })
    .to_string()
}

/// Planner response with the given steps.
pub fn plan_json(steps: &[&str]) -> String {
    json!({
        "plan": steps,
        "reasoning": "split into steps",
        "estimated_difficulty": "medium",
    })
    .to_string()
}

/// Executor response, fenced the way hosted models often answer.
pub fn execution_json(results: &str, quality_score: f64) -> String {
    let body = json!({
        "execution_process": "worked through it",
        "results": results,
        "challenges": "none",
        "quality_score": quality_score,
        "recommendations": "keep going",
    });
    format!("```json\n{body}\n```")
}

/// Reflector response.
pub fn reflection_json(assessment: &str, confidence_adjustment: f64, should_replan: bool) -> String {
    json!({
        "assessment": assessment,
        "strengths": ["steady progress"],
        "weaknesses": ["thin detail"],
        "patterns": ["tasks finish first try"],
        "recommendations": ["add detail"],
        "confidence_adjustment": confidence_adjustment,
        "should_replan": should_replan,
    })
    .to_string()
}

/// Structured task result with the given quality.
pub fn task_result(task: &str, quality_score: f64) -> TaskResult {
    TaskResult {
        task: task.to_string(),
        execution_process: format!("{task} process"),
        results: format!("{task} results"),
        challenges: String::new(),
        quality_score,
        recommendations: String::new(),
    }
}

/// Reflection record with the given assessment and no replan request.
pub fn reflection_record(assessment: &str) -> ReflectionRecord {
    ReflectionRecord {
        assessment: assessment.to_string(),
        strengths: vec!["strength".to_string()],
        weaknesses: Vec::new(),
        recommendations: Vec::new(),
        should_replan: false,
    }
}
