//! Test: Idempotence - one delegation per effect, replay across processes

use crate::helpers::*;
use phaseflow::core::{PipelineRun, RetryPolicy};
use phaseflow::execution::{
    ExecutionEngine, InvocationError, InvocationRequest, SchedulingStrategy, TaskInvoker,
};
use phaseflow::persistence::{FsEffectStore, InMemoryEffectStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const TWO_PHASES: &str = r#"
name: "Summarize"
tasks:
  - name: "extract"
  - name: "summarize"
phases:
  - id: "extract"
    task: "extract"
    input: { url: "$inputs.url" }
  - id: "summarize"
    task: "summarize"
    input: { facts: "$phases.extract.facts" }
"#;

fn agent() -> Arc<MockAgent> {
    Arc::new(
        MockAgent::new()
            .reply("extract", json!({ "facts": ["a", "b"] }))
            .reply("summarize", json!({ "summary": "a and b" })),
    )
}

fn request(run_id: Uuid, input: serde_json::Value) -> InvocationRequest {
    InvocationRequest {
        run_id,
        phase_index: 0,
        disambiguator: 0,
        input,
        retry: RetryPolicy::none(),
        timeout: Duration::from_secs(5),
    }
}

/// Test that the same effect with the same input delegates once
#[tokio::test]
async fn test_same_effect_delegates_once() {
    let process = process_from_yaml(TWO_PHASES);
    let task = process.phase("extract").unwrap().task.clone();
    let agent = agent();
    let invoker = TaskInvoker::new(agent.clone(), Arc::new(InMemoryEffectStore::new()));
    let cancel = CancellationToken::new();
    let run_id = Uuid::new_v4();

    let first = invoker
        .invoke(&task, request(run_id, json!({ "url": "u" })), &cancel)
        .await
        .unwrap();
    let second = invoker
        .invoke(&task, request(run_id, json!({ "url": "u" })), &cancel)
        .await
        .unwrap();

    assert_eq!(first.result, second.result);
    assert_eq!(first.effect_id, second.effect_id);
    assert_eq!(agent.calls("extract"), 1);

    let err = invoker
        .invoke(&task, request(run_id, json!({ "url": "other" })), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::EffectConflict { .. }));
    assert_eq!(agent.calls("extract"), 1);
}

/// Test that concurrent callers of one effect share a single delegation
#[tokio::test]
async fn test_concurrent_callers_share_delegation() {
    let process = process_from_yaml(TWO_PHASES);
    let task = process.phase("extract").unwrap().task.clone();
    let agent = Arc::new(
        MockAgent::new()
            .reply("extract", json!({ "facts": [] }))
            .with_delay(Duration::from_millis(50)),
    );
    let invoker = TaskInvoker::new(agent.clone(), Arc::new(InMemoryEffectStore::new()));
    let cancel = CancellationToken::new();
    let run_id = Uuid::new_v4();

    let (a, b) = tokio::join!(
        invoker.invoke(&task, request(run_id, json!({ "url": "u" })), &cancel),
        invoker.invoke(&task, request(run_id, json!({ "url": "u" })), &cancel),
    );

    assert_eq!(a.unwrap().result, b.unwrap().result);
    assert_eq!(agent.calls("extract"), 1);
    assert_eq!(invoker.delegations(), 1);
}

/// Test that a restarted process replays stored effects instead of delegating
#[tokio::test]
async fn test_replay_from_effect_store_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let process = process_from_yaml(TWO_PHASES);
    let run_id = Uuid::new_v4();
    let inputs = json!({ "url": "https://example.test" });

    let first_agent = agent();
    let first = ExecutionEngine::with_effect_store(
        first_agent.clone(),
        SchedulingStrategy::Sequential,
        Arc::new(FsEffectStore::new(dir.path())),
    );
    let run = PipelineRun::with_id(
        run_id,
        process.id.clone(),
        inputs.clone(),
        process.default_plan(),
        chrono::Utc::now(),
    );
    let original = first.start_run(&process, run).await.unwrap();
    assert_completed(&original);
    assert_eq!(first_agent.requests().len(), 2);

    // Payloads live at the addressed locations
    let effect = original.history[0].effect_ids[0];
    let stored = dir
        .path()
        .join("runs")
        .join(run_id.to_string())
        .join(format!("tasks/{}/result.json", effect));
    assert!(stored.exists());

    let second_agent = agent();
    let second = ExecutionEngine::with_effect_store(
        second_agent.clone(),
        SchedulingStrategy::Sequential,
        Arc::new(FsEffectStore::new(dir.path())),
    );
    let run = PipelineRun::with_id(
        run_id,
        process.id.clone(),
        inputs,
        process.default_plan(),
        chrono::Utc::now(),
    );
    let replayed = second.start_run(&process, run).await.unwrap();

    assert_completed(&replayed);
    assert!(second_agent.requests().is_empty());
    assert_eq!(replayed.phase_outputs, original.phase_outputs);
    assert_eq!(replayed.history[1].effect_ids, original.history[1].effect_ids);
}

/// Test that effect ids differ between runs and are stable within one
#[tokio::test]
async fn test_effect_ids_are_deterministic() {
    let process = process_from_yaml(TWO_PHASES);
    let inputs = json!({ "url": "u" });

    let a = engine(&agent()).start(&process, inputs.clone()).await.unwrap();
    let b = engine(&agent()).start(&process, inputs).await.unwrap();
    assert_ne!(a.history[0].effect_ids, b.history[0].effect_ids);

    let expected = phaseflow::core::task::EffectId::derive(a.run_id, 1, "summarize", 0);
    assert_eq!(a.history[1].effect_ids, vec![expected]);
}
