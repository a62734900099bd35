//! Test: Quality gates - halting, branching and bounded review loops

use super::happy_path::{review_agent, REVIEW_PROCESS};
use crate::helpers::*;
use phaseflow::core::gate::GateDecision;
use phaseflow::core::{PhaseStatus, RunErrorKind};
use phaseflow::execution::engine::PHASE_LIMIT_EXCEEDED;
use serde_json::json;
use std::sync::Arc;

/// Test that a failing gate halts the run after the gated phase
#[tokio::test]
async fn test_gate_halt() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(60);
    let run = engine(&agent)
        .start(&process, json!({ "topic": "ownership" }))
        .await
        .unwrap();

    assert_halted(&run, RunErrorKind::GateHalt);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.code, "QUALITY_GATE_FAILED");
    assert_eq!(failure.phase.as_deref(), Some("review"));
    assert_eq!(failure.message, "score >= 75 failed (observed 60)");

    // Phase 3 never invoked, artifacts of phases 1-2 kept
    assert_eq!(phase_order(&run), vec!["draft", "review"]);
    assert_eq!(agent.calls("publish"), 0);
    assert_eq!(run.artifacts.paths(), vec!["draft.md", "review.json"]);
    assert_phase_status(&run, "review", PhaseStatus::Halted);

    let result = run.to_result(chrono::Utc::now());
    assert!(!result.success);
    assert!(result.outputs.is_empty());
    assert_eq!(result.error.unwrap().kind, RunErrorKind::GateHalt);
}

/// Test that the gate decision is recorded even when it halts
#[tokio::test]
async fn test_gate_decision_in_history() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let run = engine(&review_agent(60))
        .start(&process, json!({ "topic": "ownership" }))
        .await
        .unwrap();

    match &run.history[1].gate {
        Some(GateDecision::Halt { code, reason }) => {
            assert_eq!(code, "QUALITY_GATE_FAILED");
            assert!(reason.contains("observed 60"));
        }
        other => panic!("expected halt decision, got {:?}", other),
    }
}

const REVISION_LOOP: &str = r#"
name: "Revision loop"
max_phase_runs: 6
tasks:
  - name: "draft"
  - name: "review"
  - name: "revise"
  - name: "publish"
phases:
  - id: "draft"
    task: "draft"
  - id: "review"
    task: "review"
    input: { text: "$phases.draft.text" }
    gate:
      metric: "score"
      op: ">="
      target: 75
      on_fail_branch: ["revise", "review", "publish"]
  - id: "revise"
    task: "revise"
    branch_only: true
    input: { feedback: "$phases.review.feedback" }
  - id: "publish"
    task: "publish"
"#;

/// Test a review loop that passes on the second round
#[tokio::test]
async fn test_branch_loop_until_gate_passes() {
    let process = process_from_yaml(REVISION_LOOP);
    let agent = Arc::new(
        MockAgent::new()
            .reply("draft", json!({ "text": "v1" }))
            .reply("review", json!({ "score": 50, "feedback": "more examples" }))
            .reply("review", json!({ "score": 85, "feedback": "good" }))
            .reply("revise", json!({ "text": "v2" }))
            .reply("publish", json!({ "url": "https://example.test/post" })),
    );
    let run = engine(&agent).start(&process, json!({})).await.unwrap();

    assert_completed(&run);
    assert_eq!(
        phase_order(&run),
        vec!["draft", "review", "revise", "review", "publish"]
    );
    assert_eq!(agent.calls("review"), 2);

    // Each execution gets its own index and effect
    let reviews: Vec<_> = run.records_for("review").collect();
    assert_eq!(reviews[0].phase_index, 1);
    assert_eq!(reviews[1].phase_index, 3);
    assert_ne!(reviews[0].effect_ids, reviews[1].effect_ids);
    assert_eq!(reviews[0].status, PhaseStatus::Branched);
    assert_eq!(reviews[1].status, PhaseStatus::Completed);

    assert_eq!(run.history[2].input, json!({ "feedback": "more examples" }));
    assert_eq!(run.phase_outputs["review"]["score"], 85);
}

/// Test that a loop that never passes is cut off
#[tokio::test]
async fn test_branch_loop_is_bounded() {
    let process = process_from_yaml(REVISION_LOOP);
    let agent = Arc::new(
        MockAgent::new()
            .reply("draft", json!({ "text": "v1" }))
            .reply("review", json!({ "score": 10, "feedback": "no" }))
            .reply("revise", json!({ "text": "again" })),
    );
    let run = engine(&agent).start(&process, json!({})).await.unwrap();

    assert_halted(&run, RunErrorKind::GateHalt);
    assert_eq!(run.failure.as_ref().unwrap().code, PHASE_LIMIT_EXCEEDED);
    assert_eq!(run.history.len(), 6);
    assert_eq!(agent.calls("publish"), 0);
}

/// Test that a missing metric halts instead of guessing
#[tokio::test]
async fn test_missing_metric_halts() {
    let process = process_from_yaml(REVISION_LOOP);
    let agent = Arc::new(
        MockAgent::new()
            .reply("draft", json!({ "text": "v1" }))
            .reply("review", json!({ "feedback": "no score today" })),
    );
    let run = engine(&agent).start(&process, json!({})).await.unwrap();

    assert_halted(&run, RunErrorKind::GateHalt);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.code, "METRIC_UNAVAILABLE");
    assert_eq!(failure.field.as_deref(), Some("score"));
    assert_eq!(agent.calls("revise"), 0);
}

/// Test an alternate plan taken when the gate passes
#[tokio::test]
async fn test_on_pass_branch() {
    let yaml = r#"
name: "Fast track"
tasks:
  - name: "check"
  - name: "fast"
  - name: "slow"
phases:
  - id: "check"
    task: "check"
    gate:
      metric: "risk"
      op: "<"
      target: 0.2
      on_pass_branch: ["fast"]
  - id: "slow"
    task: "slow"
  - id: "fast"
    task: "fast"
    branch_only: true
"#;
    let process = process_from_yaml(yaml);
    let agent = Arc::new(
        MockAgent::new()
            .reply("check", json!({ "risk": 0.1 }))
            .reply("fast", json!({ "ok": true }))
            .reply("slow", json!({ "ok": true })),
    );
    let run = engine(&agent).start(&process, json!({})).await.unwrap();

    assert_completed(&run);
    assert_eq!(phase_order(&run), vec!["check", "fast"]);
    assert_eq!(agent.calls("slow"), 0);
}
