//! Shared deterministic types for the agent loop.
//!
//! Payload types (`PlanOutput`, `ExecutionOutput`, `ReflectionOutput`,
//! `Decision`) are decoded from completion text and tolerate the usual model
//! sloppiness: missing fields take defaults, text fields accept any JSON
//! scalar, list fields accept a single string.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Quality score recorded when an execution payload cannot be decoded.
pub const UNSTRUCTURED_QUALITY_SCORE: f64 = 0.3;

/// Confidence carried by the fallback decision.
pub const FALLBACK_DECISION_CONFIDENCE: f64 = 0.3;

/// Clamp a score into `[0, 1]`. NaN collapses to `0`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// One executed task. Appended in plan order, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: String,
    pub execution_process: String,
    pub results: String,
    pub challenges: String,
    pub quality_score: f64,
    pub recommendations: String,
}

impl TaskResult {
    /// Build a record from a decoded execution payload.
    pub fn from_output(task: &str, output: ExecutionOutput) -> Self {
        Self {
            task: task.to_string(),
            execution_process: output.execution_process,
            results: output.results,
            challenges: output.challenges,
            quality_score: clamp_unit(output.quality_score),
            recommendations: output.recommendations,
        }
    }

    /// Low-confidence record holding the raw completion text.
    pub fn unstructured(task: &str, raw: &str) -> Self {
        Self {
            task: task.to_string(),
            execution_process: String::new(),
            results: raw.to_string(),
            challenges: String::new(),
            quality_score: UNSTRUCTURED_QUALITY_SCORE,
            recommendations: String::new(),
        }
    }
}

/// Advisory self-assessment kept in the reflection history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    pub assessment: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub should_replan: bool,
}

impl ReflectionRecord {
    /// Opaque text form stored in results and prompt context.
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&ReflectionOutput> for ReflectionRecord {
    fn from(output: &ReflectionOutput) -> Self {
        Self {
            assessment: output.assessment.clone(),
            strengths: output.strengths.clone(),
            weaknesses: output.weaknesses.clone(),
            recommendations: output.recommendations.clone(),
            should_replan: output.should_replan,
        }
    }
}

/// Plan generator payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOutput {
    #[serde(deserialize_with = "lenient_strings")]
    pub plan: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub reasoning: String,
    #[serde(deserialize_with = "lenient_string")]
    pub estimated_difficulty: String,
}

/// Task executor payload ("think / act / report").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOutput {
    #[serde(deserialize_with = "lenient_string")]
    pub execution_process: String,
    #[serde(deserialize_with = "lenient_string")]
    pub results: String,
    #[serde(deserialize_with = "lenient_string")]
    pub challenges: String,
    pub quality_score: f64,
    #[serde(deserialize_with = "lenient_string")]
    pub recommendations: String,
}

impl Default for ExecutionOutput {
    fn default() -> Self {
        Self {
            execution_process: String::new(),
            results: String::new(),
            challenges: String::new(),
            quality_score: 0.5,
            recommendations: String::new(),
        }
    }
}

/// Reflector payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionOutput {
    #[serde(deserialize_with = "lenient_string")]
    pub assessment: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub strengths: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub weaknesses: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub patterns: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub recommendations: Vec<String>,
    pub confidence_adjustment: f64,
    pub should_replan: bool,
}

/// The one action the controller picks per iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Plan,
    Execute,
    Reflect,
    Replan,
    Complete,
    /// Any label outside the five known actions. Dispatched as `Reflect`.
    Unrecognized(String),
}

impl Action {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "plan" => Self::Plan,
            "execute" => Self::Execute,
            "reflect" => Self::Reflect,
            "replan" => Self::Replan,
            "complete" => Self::Complete,
            _ => Self::Unrecognized(label.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::Reflect => "reflect",
            Self::Replan => "replan",
            Self::Complete => "complete",
            Self::Unrecognized(label) => label.as_str(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = lenient_string(deserializer)?;
        Ok(Self::parse(&label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl<'de> Deserialize<'de> for Urgency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = lenient_string(deserializer)?;
        Ok(match label.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        })
    }
}

/// Controller output for a single iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default = "default_action")]
    pub action: Action,
    #[serde(default = "default_reasoning", deserialize_with = "lenient_string")]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub urgency: Urgency,
}

impl Decision {
    pub fn new(action: Action, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            action,
            reasoning: reasoning.into(),
            confidence,
            urgency: Urgency::Medium,
        }
    }

    /// Decision used when the controller's own output is unreadable: reflect
    /// instead of repeating whatever happened last.
    pub fn fallback() -> Self {
        Self::new(Action::Reflect, "fallback", FALLBACK_DECISION_CONFIDENCE)
    }
}

fn default_action() -> Action {
    Action::Reflect
}

fn default_reasoning() -> String {
    "No reasoning provided".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

/// Last action taken by the loop, plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Planning,
    Executing,
    Reflecting,
    Completed,
    MaxIterationsReached,
}

impl SessionStatus {
    pub fn for_action(action: &Action) -> Self {
        match action {
            Action::Plan | Action::Replan => Self::Planning,
            Action::Execute => Self::Executing,
            Action::Reflect | Action::Unrecognized(_) => Self::Reflecting,
            Action::Complete => Self::Completed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Reflecting => "reflecting",
            Self::Completed => "completed",
            Self::MaxIterationsReached => "max_iterations_reached",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

fn lenient_strings<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .filter(|item| !item.is_null())
            .map(value_to_text)
            .collect(),
        other => vec![value_to_text(other)],
    })
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}
