//! Test: Event ordering - observers see causally ordered events

use crate::helpers::*;
use crate::scenarios::happy_path::{review_agent, REVIEW_PROCESS};
use phaseflow::execution::ExecutionEvent;
use phaseflow::RunStatus;
use serde_json::json;

/// Test the sequence of a three-phase run
#[tokio::test]
async fn test_sequential_event_order() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(80);
    let engine = engine(&agent);
    let log = EventLog::attach(&engine);

    let run = engine
        .start(&process, json!({ "topic": "borrowing" }))
        .await
        .unwrap();
    assert_completed(&run);

    assert_eq!(
        log.labels(),
        vec![
            "start:draft",
            "resolved:draft",
            "done:draft",
            "start:review",
            "resolved:review",
            "gate:review",
            "done:review",
            "start:publish",
            "resolved:publish",
            "done:publish",
        ]
    );

    let events = log.events();
    assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            status: RunStatus::Completed,
            ..
        })
    ));
}

/// Test that every invocation is announced before it resolves
#[tokio::test]
async fn test_invocation_created_before_resolved() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(80);
    let engine = engine(&agent);
    let log = EventLog::attach(&engine);

    let run = engine
        .start(&process, json!({ "topic": "borrowing" }))
        .await
        .unwrap();

    let events = log.events();
    for record in &run.history {
        let effect = record.effect_ids[0];
        let created = events
            .iter()
            .position(|e| matches!(e, ExecutionEvent::InvocationCreated { effect_id, .. } if *effect_id == effect))
            .unwrap();
        let resolved = events
            .iter()
            .position(|e| matches!(e, ExecutionEvent::InvocationResolved { effect_id, .. } if *effect_id == effect))
            .unwrap();
        assert!(created < resolved, "phase '{}'", record.phase_id);
    }
}

/// Test that a halting gate ends the event stream
#[tokio::test]
async fn test_halt_ends_events() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(40);
    let engine = engine(&agent);
    let log = EventLog::attach(&engine);

    engine
        .start(&process, json!({ "topic": "borrowing" }))
        .await
        .unwrap();

    let labels = log.labels();
    assert_eq!(labels.last().map(String::as_str), Some("done:review"));
    assert!(!labels.iter().any(|l| l.ends_with(":publish")));
    assert!(matches!(
        log.events().last(),
        Some(ExecutionEvent::RunFinished {
            status: RunStatus::Halted,
            ..
        })
    ));
}
