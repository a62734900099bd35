//! Test: Breakpoints - human review, rejection, recovery and resume

use crate::helpers::*;
use phaseflow::core::breakpoint::{Breakpoint, Decision, Resolution};
use phaseflow::core::{PhaseStatus, RunErrorKind, RunStatus};
use phaseflow::execution::{
    AutoApprove, ChannelHandler, EngineError, ExecutionEngine, FixedResolution, SchedulingStrategy,
};
use phaseflow::persistence::{InMemoryPersistence, PersistenceBackend};
use serde_json::json;
use std::sync::Arc;

const PLAN_PROCESS: &str = r#"
name: "Plan then build"
tasks:
  - name: "plan"
  - name: "build"
  - name: "replan"
phases:
  - id: "plan"
    task: "plan"
    input: { goal: "$inputs.goal" }
    breakpoint:
      title: "Plan review"
      question: "Build according to this plan?"
      summary:
        plan: "$phases.plan"
        steps: "$phases.plan.steps"
  - id: "build"
    task: "build"
    input: { steps: "$phases.plan.steps" }
"#;

fn plan_agent() -> Arc<MockAgent> {
    Arc::new(
        MockAgent::new()
            .reply(
                "plan",
                json!({ "steps": ["parse", "emit"], "artifacts": [{ "path": "plan.md" }] }),
            )
            .reply("build", json!({ "ok": true, "artifacts": [{ "path": "out/main.rs" }] }))
            .reply("replan", json!({ "steps": ["parse"] })),
    )
}

/// Test that a rejected breakpoint halts the run
#[tokio::test]
async fn test_breakpoint_rejection_halts() {
    let process = process_from_yaml(PLAN_PROCESS);
    let agent = plan_agent();
    let engine = engine(&agent)
        .with_breakpoint_handler(Arc::new(FixedResolution(Resolution::reject("too risky"))));

    let run = engine.start(&process, json!({ "goal": "compiler" })).await.unwrap();

    assert_halted(&run, RunErrorKind::BreakpointRejected);
    assert_eq!(phase_order(&run), vec!["plan"]);
    assert_eq!(agent.calls("build"), 0);
    assert_phase_status(&run, "plan", PhaseStatus::Halted);

    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.phase.as_deref(), Some("plan"));
    assert!(failure.message.contains("too risky"));

    // The trace shows exactly what the reviewer saw
    let record = &run.history[0];
    let trace = record.breakpoint.as_ref().expect("breakpoint trace");
    assert_eq!(trace.resolution.decision, Decision::Rejected);
    assert_eq!(
        Some(&trace.payload.context.summary["plan"]),
        record.output.as_ref()
    );
    assert_eq!(trace.payload.context.summary["steps"], json!(["parse", "emit"]));
    assert_eq!(trace.payload.context.run_id, run.run_id);
    assert_eq!(trace.payload.title, "Plan review");
    assert_eq!(trace.payload.question, "Build according to this plan?");
    assert_eq!(
        trace.payload.context.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(),
        vec!["plan.md"]
    );
}

/// Test that approval continues the run
#[tokio::test]
async fn test_breakpoint_approval_continues() {
    let process = process_from_yaml(PLAN_PROCESS);
    let agent = plan_agent();
    let engine = engine(&agent).with_breakpoint_handler(Arc::new(AutoApprove));

    let run = engine.start(&process, json!({ "goal": "compiler" })).await.unwrap();

    assert_completed(&run);
    assert_eq!(phase_order(&run), vec!["plan", "build"]);
    let trace = run.history[0].breakpoint.as_ref().unwrap();
    assert_eq!(trace.resolution.decision, Decision::Approved);
    assert_eq!(trace.resolution.resolved_by.as_deref(), Some("auto-approve"));
    assert!(trace.resolved_at >= trace.created_at);
}

/// Test a declared recovery path after rejection
#[tokio::test]
async fn test_breakpoint_rejection_with_recovery() {
    let yaml = r#"
name: "Plan with recovery"
tasks:
  - name: "plan"
  - name: "replan"
  - name: "build"
phases:
  - id: "plan"
    task: "plan"
    breakpoint:
      title: "Plan review"
      question: "Build it?"
      on_reject: ["replan", "build"]
  - id: "replan"
    task: "replan"
    branch_only: true
    input: { previous: "$phases.plan.steps" }
  - id: "build"
    task: "build"
"#;
    let process = process_from_yaml(yaml);
    let agent = plan_agent();
    let engine = engine(&agent)
        .with_breakpoint_handler(Arc::new(FixedResolution(Resolution::reject("smaller please"))));

    let run = engine.start(&process, json!({})).await.unwrap();

    assert_completed(&run);
    assert_eq!(phase_order(&run), vec!["plan", "replan", "build"]);
    assert_phase_status(&run, "plan", PhaseStatus::Branched);
    assert_eq!(run.history[1].input, json!({ "previous": ["parse", "emit"] }));
}

/// Test parking a run and resuming it from storage with a fresh engine
#[tokio::test]
async fn test_park_persist_and_resume() {
    let process = process_from_yaml(PLAN_PROCESS);
    let history = Arc::new(InMemoryPersistence::new());

    let first_agent = plan_agent();
    let first = ExecutionEngine::new(first_agent.clone(), SchedulingStrategy::Sequential)
        .with_persistence(history.clone());
    let parked = first.start(&process, json!({ "goal": "compiler" })).await.unwrap();

    assert_eq!(parked.status, RunStatus::AwaitingBreakpoint);
    let pending = parked.pending_breakpoint.as_ref().unwrap();
    assert_eq!(pending.id, Breakpoint::derive_id(parked.run_id, 0, "plan"));
    let result = parked.to_result(chrono::Utc::now());
    assert!(!result.success);
    assert_eq!(result.metadata.breakpoint_id, Some(pending.id));

    // A separate process picks the run up from storage
    let stored = history.load_run(parked.run_id).await.unwrap().unwrap();
    assert_eq!(stored, parked);

    let second_agent = plan_agent();
    let second = ExecutionEngine::new(second_agent.clone(), SchedulingStrategy::Sequential)
        .with_persistence(history.clone());
    let resumed = second
        .resume(&process, stored, Resolution::approve().by("reviewer"))
        .await
        .unwrap();

    assert_completed(&resumed);
    assert_eq!(phase_order(&resumed), vec!["plan", "build"]);
    assert_eq!(second_agent.calls("plan"), 0);
    assert_eq!(second_agent.calls("build"), 1);
    assert_eq!(resumed.artifacts.paths(), vec!["plan.md", "out/main.rs"]);
    assert_phase_status(&resumed, "plan", PhaseStatus::Completed);

    let saved = history.load_run(resumed.run_id).await.unwrap().unwrap();
    assert_eq!(saved.status, RunStatus::Completed);
    assert!(saved.pending_breakpoint.is_none());
}

/// Test that a resolution for another breakpoint is refused
#[tokio::test]
async fn test_resume_rejects_wrong_breakpoint() {
    let process = process_from_yaml(PLAN_PROCESS);
    let agent = plan_agent();
    let engine = engine(&agent);
    let parked = engine.start(&process, json!({ "goal": "x" })).await.unwrap();

    let err = engine
        .resume_breakpoint(&process, parked.clone(), uuid::Uuid::new_v4(), Resolution::approve())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Breakpoint(_)));

    let pending = parked.pending_breakpoint.as_ref().unwrap().id;
    let run = engine
        .resume_breakpoint(&process, parked, pending, Resolution::approve())
        .await
        .unwrap();
    assert_completed(&run);
}

/// Test resolving through a channel-backed review surface
#[tokio::test]
async fn test_channel_review_surface() {
    let process = process_from_yaml(PLAN_PROCESS);
    let agent = plan_agent();
    let (handler, mut reviews) = ChannelHandler::new(1);
    let engine = engine(&agent).with_breakpoint_handler(Arc::new(handler));

    let reviewer = tokio::spawn(async move {
        let pending = reviews.recv().await.unwrap();
        let payload = pending.breakpoint.payload();
        // Only artifacts up to the triggering phase
        let files: Vec<String> = payload.context.files.iter().map(|f| f.path.clone()).collect();
        pending.resolve(Resolution::approve()).unwrap();
        files
    });

    let run = engine.start(&process, json!({ "goal": "compiler" })).await.unwrap();
    let seen_files = reviewer.await.unwrap();

    assert_completed(&run);
    assert_eq!(seen_files, vec!["plan.md".to_string()]);
}
