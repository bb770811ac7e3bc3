//! Loop-level lifecycle tests.
//!
//! These drive `run` / `run_session` through whole sessions with a scripted
//! completion service to verify dispatch, fallbacks and termination.

use taskloop::agents::controller::{LlmController, SequentialController};
use taskloop::core::types::{Action, SessionStatus, UNSTRUCTURED_QUALITY_SCORE};
use taskloop::io::completion::{CompletionError, Profile};
use taskloop::session::{IterationEffect, IterationReport, SessionConfig, run, run_session};
use taskloop::test_support::{
    ScriptedCompletion, decision_json, execution_json, plan_json, reflection_json,
};

fn session_config(max_iterations: u32) -> SessionConfig {
    SessionConfig {
        max_iterations,
        ..SessionConfig::default()
    }
}

fn controller() -> LlmController {
    LlmController::new(SessionConfig::default().agent_settings(Profile::Deterministic))
}

/// Plan, three executions, complete.
///
/// Script (controller and component responses interleaved):
/// ```text
/// 1. plan      -> 3-item plan
/// 2. execute   -> task 1
/// 3. execute   -> task 2
/// 4. execute   -> task 3
/// 5. complete
/// ```
#[test]
fn full_session_completes_plan() {
    let service = ScriptedCompletion::new([
        decision_json("plan", 0.7),
        plan_json(&["Step 1: gather", "Step 2: draft", "Step 3: review"]),
        decision_json("execute", 0.7),
        execution_json("gathered", 0.8),
        decision_json("execute", 0.75),
        execution_json("drafted", 0.85),
        decision_json("execute", 0.8),
        execution_json("reviewed", 0.9),
        decision_json("complete", 0.95),
    ]);

    let outcome = run(&service, "X", 20).expect("run");

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.completed_tasks.len(), 3);
    assert_eq!(outcome.iterations_used, 5);
    assert_eq!(outcome.objective, "X");
    assert_eq!(outcome.final_confidence, 0.95);
    let results: Vec<_> = outcome.completed_tasks.iter().map(|t| t.results.as_str()).collect();
    assert_eq!(results, ["gathered", "drafted", "reviewed"]);
    assert_eq!(service.remaining(), 0);

    let json = serde_json::to_value(&outcome).expect("encode");
    assert_eq!(json["status"], "completed");
    assert_eq!(json["iterations_used"], 5);
}

/// Always-execute with a planner that never returns a plan: the first
/// iteration bootstraps planning, the second tries again, and the budget ends
/// the session.
#[test]
fn execute_loop_without_plan_exhausts_budget() {
    let service = ScriptedCompletion::new(std::iter::repeat_n(decision_json("execute", 0.6), 4));
    let mut effects = Vec::new();

    let outcome = run_session(&service, &controller(), "Y", &session_config(2), |report| {
        effects.push(report.effect.clone());
    })
    .expect("run");

    assert_eq!(outcome.status, SessionStatus::MaxIterationsReached);
    assert_eq!(outcome.iterations_used, 2);
    assert!(outcome.completed_tasks.is_empty());
    assert!(outcome.plan.is_empty());
    assert_eq!(
        effects,
        [
            IterationEffect::Planned {
                tasks: 0,
                revision: false
            },
            IterationEffect::Planned {
                tasks: 0,
                revision: false
            },
        ]
    );
    assert_eq!(service.calls(), 4);
}

#[test]
fn reflect_without_history_changes_nothing() {
    let service = ScriptedCompletion::new([decision_json("reflect", 0.4)]);
    let mut reports: Vec<IterationReport> = Vec::new();

    let outcome = run_session(&service, &controller(), "Z", &session_config(1), |report| {
        reports.push(report.clone());
    })
    .expect("run");

    assert_eq!(reports[0].effect, IterationEffect::ReflectionSkipped);
    assert!(outcome.reflections.is_empty());
    assert_eq!(outcome.final_confidence, 0.4);
    assert_eq!(service.calls(), 1, "reflector is not called");
}

#[test]
fn unstructured_execution_is_recorded_with_low_quality() {
    let raw = "I did the research and found three sources.";
    let service = ScriptedCompletion::new([
        decision_json("plan", 0.6),
        plan_json(&["research"]),
        decision_json("execute", 0.6),
        format!("```\n{raw}\n```"),
        decision_json("complete", 0.6),
    ]);

    let outcome = run(&service, "research topic", 10).expect("run");

    let result = &outcome.completed_tasks[0];
    assert_eq!(result.task, "research");
    assert_eq!(result.results, raw);
    assert_eq!(result.quality_score, UNSTRUCTURED_QUALITY_SCORE);
    assert!(result.execution_process.is_empty());
}

#[test]
fn unreadable_decision_defaults_to_reflection() {
    let service = ScriptedCompletion::new(["let's keep going!".to_string(), decision_json("complete", 0.9)]);
    let mut reports: Vec<IterationReport> = Vec::new();

    let outcome = run_session(&service, &controller(), "W", &session_config(5), |report| {
        reports.push(report.clone());
    })
    .expect("run");

    let first = &reports[0].decision;
    assert_eq!(first.action, Action::Reflect);
    assert_eq!(first.confidence, 0.3);
    assert_eq!(first.reasoning, "fallback");
    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.iterations_used, 2);
}

#[test]
fn iterations_never_exceed_budget() {
    for max_iterations in [1, 3, 7] {
        let decisions = std::iter::repeat_n(decision_json("reflect", 0.5), 10);
        let service = ScriptedCompletion::new(decisions);
        let mut seen = 0;

        let outcome = run_session(
            &service,
            &controller(),
            "never done",
            &session_config(max_iterations),
            |_| seen += 1,
        )
        .expect("run");

        assert_eq!(outcome.iterations_used, max_iterations);
        assert_eq!(seen, max_iterations);
        assert_eq!(outcome.status, SessionStatus::MaxIterationsReached);
    }
}

/// Replanning keeps completed results, so the cursor carries over into the
/// new plan: a shorter plan leaves nothing to run and a longer one resumes at
/// the old index.
#[test]
fn replan_keeps_cursor_position() {
    let service = ScriptedCompletion::new([
        decision_json("plan", 0.6),
        plan_json(&["a", "b", "c"]),
        decision_json("execute", 0.6),
        execution_json("a done", 0.8),
        decision_json("execute", 0.6),
        execution_json("b done", 0.8),
        decision_json("replan", 0.5),
        plan_json(&["x"]),
        decision_json("execute", 0.5),
        decision_json("replan", 0.5),
        plan_json(&["w", "x", "y", "z"]),
        decision_json("execute", 0.5),
        execution_json("y done", 0.7),
        decision_json("complete", 0.9),
    ]);
    let mut effects = Vec::new();

    let outcome = run_session(&service, &controller(), "cursor", &session_config(20), |report| {
        effects.push(report.effect.clone());
    })
    .expect("run");

    assert_eq!(
        effects[3],
        IterationEffect::Planned {
            tasks: 1,
            revision: true
        }
    );
    assert_eq!(effects[4], IterationEffect::AllTasksDone);
    assert!(matches!(effects[6], IterationEffect::Executed { index: 2, .. }));

    let tasks: Vec<_> = outcome.completed_tasks.iter().map(|t| t.task.as_str()).collect();
    assert_eq!(tasks, ["a", "b", "y"]);
    assert_eq!(outcome.replan_count, 2);
    assert_eq!(outcome.status, SessionStatus::Completed);
}

#[test]
fn reflection_adjusts_confidence_within_bounds() {
    let service = ScriptedCompletion::new([
        decision_json("plan", 0.9),
        plan_json(&["only"]),
        decision_json("execute", 0.9),
        execution_json("done", 0.9),
        decision_json("reflect", 0.9),
        reflection_json("great", 0.5, false),
        decision_json("reflect", 0.2),
        reflection_json("actually poor", -0.9, true),
    ]);

    let outcome = run_session(&service, &controller(), "bounds", &session_config(4), |_| {})
        .expect("run");

    assert_eq!(outcome.reflections.len(), 2);
    assert_eq!(outcome.final_confidence, 0.0);
    assert!(outcome.reflections[1].contains("\"should_replan\":true"));
}

#[test]
fn completion_failure_aborts_session() {
    let service = ScriptedCompletion::new([decision_json("plan", 0.6)]);

    let err = run(&service, "fails", 10).expect_err("planner call has no response");

    let cause = err
        .downcast_ref::<CompletionError>()
        .expect("completion error in chain");
    assert!(matches!(cause, CompletionError::Network(_)));
    assert!(format!("{err:#}").contains("plan (iteration 1)"));
}

#[test]
fn sequential_session_needs_no_controller_calls() {
    let service = ScriptedCompletion::new([
        plan_json(&["one", "two", "three"]),
        execution_json("1", 0.9),
        execution_json("2", 0.9),
        execution_json("3", 0.9),
    ]);

    let outcome = run_session(&service, &SequentialController, "seq", &session_config(20), |_| {})
        .expect("run");

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.completed_tasks.len(), 3);
    assert_eq!(outcome.iterations_used, 5);
    let labels: Vec<_> = service.requests().iter().map(|r| r.label).collect();
    assert_eq!(labels, ["planner", "executor", "executor", "executor"]);
}
