//! Test: Schema errors - malformed payloads halt with the offending field

use crate::helpers::*;
use phaseflow::core::RunErrorKind;
use phaseflow::execution::engine::OUTPUT_UNRESOLVED;
use serde_json::{json, Value};
use std::sync::Arc;

const AUDIT_PROCESS: &str = r#"
name: "Audit"
tasks:
  - name: "scan"
    input:
      type: object
      required: [repo]
      properties:
        repo: { type: string, min_length: 1 }
        depth: { type: integer, minimum: 1, maximum: 5 }
    output:
      type: object
      required: [findings]
      properties:
        findings:
          type: array
          items:
            type: object
            required: [title, confidence]
            properties:
              title: { type: string }
              confidence: { type: confidence }
              severity: { type: enum, values: ["low", "medium", "high"] }
  - name: "report"
phases:
  - id: "scan"
    task: "scan"
    input: { repo: "$inputs.repo", depth: "$inputs.depth" }
  - id: "report"
    task: "report"
    input: { findings: "$phases.scan.findings" }
"#;

async fn audit_with(scan_output: Value, inputs: Value) -> (phaseflow::core::PipelineRun, Arc<MockAgent>) {
    let process = process_from_yaml(AUDIT_PROCESS);
    let agent = Arc::new(
        MockAgent::new()
            .reply("scan", scan_output)
            .reply("report", json!({ "ok": true })),
    );
    let run = engine(&agent).start(&process, inputs).await.unwrap();
    (run, agent)
}

fn assert_schema_error(run: &phaseflow::core::PipelineRun, field: &str) {
    assert_halted(run, RunErrorKind::SchemaError);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.field.as_deref(), Some(field), "{}", failure);
    assert_eq!(failure.phase.as_deref(), Some("scan"));
    assert!(failure.effect_id.is_some());
}

/// Test that a missing output field halts before the next phase
#[tokio::test]
async fn test_missing_field() {
    let (run, agent) = audit_with(json!({ "notes": "nothing" }), json!({ "repo": "r", "depth": 2 })).await;

    assert_schema_error(&run, "$.findings");
    assert_eq!(agent.calls("report"), 0);
    assert!(run.history[0].output.is_none());
    assert!(!run.phase_outputs.contains_key("scan"));
}

/// Test a wrong type deep inside the output
#[tokio::test]
async fn test_wrong_type() {
    let output = json!({ "findings": [
        { "title": "ok", "confidence": 0.9 },
        { "title": 7, "confidence": 0.5 }
    ] });
    let (run, _) = audit_with(output, json!({ "repo": "r", "depth": 2 })).await;
    assert_schema_error(&run, "$.findings[1].title");
}

/// Test an out-of-range numeric value
#[tokio::test]
async fn test_out_of_range() {
    let output = json!({ "findings": [
        { "title": "a", "confidence": 0.4 },
        { "title": "b", "confidence": 1.7 }
    ] });
    let (run, _) = audit_with(output, json!({ "repo": "r", "depth": 2 })).await;
    assert_schema_error(&run, "$.findings[1].confidence");
}

/// Test a value outside its enumeration
#[tokio::test]
async fn test_not_in_enum() {
    let output = json!({ "findings": [
        { "title": "a", "confidence": 0.4, "severity": "catastrophic" }
    ] });
    let (run, _) = audit_with(output, json!({ "repo": "r", "depth": 2 })).await;
    assert_schema_error(&run, "$.findings[0].severity");
}

/// Test that invalid task input never reaches the agent
#[tokio::test]
async fn test_invalid_task_input() {
    let (run, agent) = audit_with(json!({ "findings": [] }), json!({ "repo": "r", "depth": 9 })).await;

    assert_halted(&run, RunErrorKind::InvalidInput);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.field.as_deref(), Some("$.depth"));
    assert!(agent.requests().is_empty());
}

/// Test that an unresolvable binding is reported with its reference
#[tokio::test]
async fn test_unresolvable_binding() {
    let (run, agent) = audit_with(json!({ "findings": [] }), json!({ "repo": "r" })).await;

    assert_halted(&run, RunErrorKind::InvalidInput);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.field.as_deref(), Some("$inputs.depth"));
    assert_eq!(failure.phase.as_deref(), Some("scan"));
    assert!(agent.requests().is_empty());
}

/// Test that a completed phase output always satisfies its contract
#[tokio::test]
async fn test_valid_output_passes_through() {
    let output = json!({ "findings": [{ "title": "a", "confidence": 1, "severity": "low" }] });
    let (run, agent) = audit_with(output.clone(), json!({ "repo": "r", "depth": 1 })).await;

    assert_completed(&run);
    assert_eq!(run.phase_outputs["scan"], output);
    assert_eq!(agent.requests()[1].input, json!({ "findings": output["findings"] }));
}

/// Test declared outputs that cannot be bound at completion
#[tokio::test]
async fn test_unresolved_run_output() {
    let yaml = r#"
name: "Outputs"
outputs:
  url: "$phases.publish.url"
tasks:
  - name: "publish"
phases:
  - id: "publish"
    task: "publish"
"#;
    let process = process_from_yaml(yaml);
    let agent = Arc::new(MockAgent::new().reply("publish", json!({ "status": "done" })));
    let run = engine(&agent).start(&process, json!({})).await.unwrap();

    assert_halted(&run, RunErrorKind::SchemaError);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.code, OUTPUT_UNRESOLVED);
    assert_eq!(failure.field.as_deref(), Some("$phases.publish.url"));
    assert!(run.outputs.is_empty());
}

/// Test definitions rejected at load time
#[test]
fn test_definition_errors() {
    let forward = r#"
name: "Forward"
tasks: [{ name: "t" }]
phases:
  - { id: "a", task: "t", input: { x: "$phases.b.x" } }
  - { id: "b", task: "t" }
"#;
    assert!(load_error(forward).contains("not declared before it"));

    let unknown_task = r#"
name: "Unknown"
tasks: [{ name: "t" }]
phases:
  - { id: "a", task: "missing" }
"#;
    assert!(load_error(unknown_task).contains("non-existent task 'missing'"));

    let duplicate = r#"
name: "Duplicate"
tasks: [{ name: "t" }]
phases:
  - { id: "a", task: "t" }
  - { id: "a", task: "t" }
"#;
    assert!(load_error(duplicate).contains("Duplicate phase ID: a"));

    let stray_item = r#"
name: "Item"
tasks: [{ name: "t" }]
phases:
  - { id: "a", task: "t", input: { x: "$item.name" } }
"#;
    assert!(load_error(stray_item).contains("$item outside a for_each phase"));

    let bad_contract = r#"
name: "Contract"
tasks:
  - name: "t"
    output: { type: number, minimum: 5, maximum: 1 }
phases:
  - { id: "a", task: "t" }
"#;
    assert!(load_error(bad_contract).contains("minimum 5 exceeds maximum 1"));

    let shadowing = r#"
name: "Shadowing"
outputs:
  artifacts: "$phases.a.list"
tasks: [{ name: "t" }]
phases:
  - { id: "a", task: "t" }
"#;
    assert!(load_error(shadowing).contains("Output 'artifacts' collides with a reserved result field"));
}
