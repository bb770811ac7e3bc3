//! Session invariants checked after every iteration.

use thiserror::Error;

use crate::core::state::SessionState;

/// Index bookkeeping went wrong. Not recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invariant violated: {0}")]
pub struct InvariantViolation(pub String);

/// Check the session invariants:
/// - completed results never outnumber plan entries while a plan exists
/// - confidence and quality scores stay in `[0, 1]`
pub fn validate_invariants(state: &SessionState) -> Vec<String> {
    let mut errors = Vec::new();

    let plan_len = state.plan().len();
    let completed = state.completed_tasks().len();
    if plan_len > 0 && completed > plan_len {
        errors.push(format!(
            "{completed} completed tasks exceed plan length {plan_len}"
        ));
    }

    let confidence = state.confidence_score();
    if !(0.0..=1.0).contains(&confidence) {
        errors.push(format!("confidence {confidence} outside [0, 1]"));
    }

    for (index, result) in state.completed_tasks().iter().enumerate() {
        if !(0.0..=1.0).contains(&result.quality_score) {
            errors.push(format!(
                "task {}: quality {} outside [0, 1]",
                index + 1,
                result.quality_score
            ));
        }
    }

    errors
}
