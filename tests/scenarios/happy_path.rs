//! Test: Happy path - a gated three-phase process runs to completion

use crate::helpers::*;
use phaseflow::core::gate::GateDecision;
use phaseflow::core::PhaseStatus;
use serde_json::json;
use std::sync::Arc;

pub const REVIEW_PROCESS: &str = r#"
name: "Draft and review"
id: "draft-review"
inputs:
  type: object
  required: [topic]
  properties:
    topic: { type: string, min_length: 1 }
outputs:
  summary: "$phases.publish.summary"
  score: "$phases.review.score"
tasks:
  - name: "draft"
    output:
      type: object
      required: [text]
  - name: "review"
    output:
      type: object
      required: [score]
      properties:
        score: { type: number, minimum: 0, maximum: 100 }
  - name: "publish"
phases:
  - id: "draft"
    task: "draft"
    input: { topic: "$inputs.topic" }
  - id: "review"
    task: "review"
    input: { text: "$phases.draft.text" }
    gate: { metric: "score", op: ">=", target: 75 }
  - id: "publish"
    task: "publish"
    input: { text: "$phases.draft.text", score: "$phases.review.score" }
"#;

pub fn review_agent(score: u64) -> Arc<MockAgent> {
    Arc::new(
        MockAgent::new()
            .reply(
                "draft",
                json!({ "text": "Ownership explained", "artifacts": [{ "path": "draft.md" }] }),
            )
            .reply(
                "review",
                json!({ "score": score, "artifacts": [{ "path": "review.json", "label": "review notes" }] }),
            )
            .reply(
                "publish",
                json!({ "summary": "published", "artifacts": [{ "path": "site/index.html" }] }),
            ),
    )
}

/// Test the three-phase process with a passing gate
#[tokio::test]
async fn test_happy_path_completes() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(80);
    let engine = engine(&agent);

    let run = engine
        .start(&process, json!({ "topic": "ownership" }))
        .await
        .unwrap();

    assert_completed(&run);
    assert_eq!(phase_order(&run), vec!["draft", "review", "publish"]);
    assert!(matches!(
        run.history[1].gate,
        Some(GateDecision::Continue { .. })
    ));
    assert_phase_status(&run, "review", PhaseStatus::Completed);

    assert_eq!(run.outputs["summary"], "published");
    assert_eq!(run.outputs["score"], 80);

    // Inputs were bound from earlier outputs
    assert_eq!(run.history[2].input, json!({ "text": "Ownership explained", "score": 80 }));
    assert_eq!(agent.calls("draft"), 1);
    assert_eq!(agent.calls("publish"), 1);
}

/// Test the user-visible result shape
#[tokio::test]
async fn test_result_shape() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(80);
    let result = engine(&agent)
        .run(&process, json!({ "topic": "ownership" }))
        .await
        .unwrap();

    assert!(result.success);
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["success"], true);
    assert_eq!(value["summary"], "published");
    assert_eq!(value["score"], 80);
    assert_eq!(value["metadata"]["processId"], "draft-review");
    assert!(value["metadata"]["runId"].is_string());
    assert!(value["metadata"]["timestamp"].is_string());
    assert!(value["duration"].as_f64().unwrap() >= 0.0);
    assert!(value.get("error").is_none());

    let paths: Vec<&str> = result.artifacts.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["draft.md", "review.json", "site/index.html"]);
}

/// Test that the worker receives the addressing convention
#[tokio::test]
async fn test_requests_carry_io_locations() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(90);
    let run = engine(&agent)
        .start(&process, json!({ "topic": "ownership" }))
        .await
        .unwrap();

    let requests = agent.requests();
    assert_eq!(requests.len(), 3);
    for (request, record) in requests.iter().zip(&run.history) {
        assert_eq!(request.run_id, run.run_id);
        assert_eq!(request.effect_id, record.effect_ids[0]);
        assert_eq!(
            request.input_location,
            format!("tasks/{}/input.json", request.effect_id)
        );
        assert_eq!(
            request.output_location,
            format!("tasks/{}/result.json", request.effect_id)
        );
        assert_eq!(request.attempt, 1);
    }
}

/// Test that the bundled sample process loads and runs
#[tokio::test]
async fn test_sample_process() {
    let process = process_from_yaml(include_str!("../../processes/article-review.yaml"));
    assert_eq!(process.id, "article-review");

    let agent = Arc::new(
        MockAgent::new()
            .reply("research", json!({ "sources": [{ "title": "The Book", "relevance": 0.9 }] }))
            .reply("draft", json!({ "text": "Use Result and ?" }))
            .reply("review", json!({ "score": 88, "feedback": "clear" }))
            .reply("publish", json!({ "url": "https://example.test/errors" })),
    );
    let engine = engine(&agent).with_breakpoint_handler(Arc::new(phaseflow::execution::AutoApprove));
    let run = engine
        .start(&process, json!({ "topic": "error handling", "audience": "beginner" }))
        .await
        .unwrap();

    assert_completed(&run);
    assert_eq!(run.outputs["url"], json!("https://example.test/errors"));
    assert_eq!(run.outputs["score"], json!(88));
    let publish = agent.requests().into_iter().find(|r| r.task == "publish").unwrap();
    assert!(publish.input_location.starts_with("publish/"));
    assert!(publish.input_location.ends_with("/request.json"));
}
