//! Test: Artifacts - per-run manifest built from phase outputs

use crate::helpers::*;
use crate::scenarios::happy_path::{review_agent, REVIEW_PROCESS};
use phaseflow::core::RunErrorKind;
use phaseflow::execution::engine::ARTIFACTS_INVALID;
use serde_json::json;
use std::sync::Arc;

const BUILD_PROCESS: &str = r#"
name: "Build docs"
tasks:
  - name: "render"
  - name: "polish"
phases:
  - id: "render"
    task: "render"
    artifacts:
      - { path: "docs/style.css", format: "css" }
  - id: "polish"
    task: "polish"
    artifacts_field: "files"
"#;

/// Test that artifacts accumulate in first-seen order across phases
#[tokio::test]
async fn test_manifest_follows_phase_order() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(90);
    let run = engine(&agent)
        .start(&process, json!({ "topic": "lifetimes" }))
        .await
        .unwrap();

    assert_completed(&run);
    assert_eq!(
        run.artifacts.paths(),
        vec!["draft.md", "review.json", "site/index.html"]
    );
    let review = run.artifacts.iter().find(|a| a.path == "review.json").unwrap();
    assert_eq!(review.format, "json");
    assert_eq!(review.label.as_deref(), Some("review notes"));
}

/// Test that a path reported twice keeps one entry with the newer metadata
#[tokio::test]
async fn test_duplicate_paths_are_merged() {
    let process = process_from_yaml(BUILD_PROCESS);
    let agent = Arc::new(
        MockAgent::new()
            .reply("render", json!({ "artifacts": [{ "path": "docs/index.md" }] }))
            .reply(
                "polish",
                json!({ "files": [
                    { "path": "docs/index.md", "format": "markdown", "label": "polished" },
                    { "path": "docs/api.rs", "format": "code", "language": "rust" }
                ] }),
            ),
    );
    let run = engine(&agent).start(&process, json!({})).await.unwrap();

    assert_completed(&run);
    assert_eq!(
        run.artifacts.paths(),
        vec!["docs/style.css", "docs/index.md", "docs/api.rs"]
    );
    let index = run.artifacts.iter().find(|a| a.path == "docs/index.md").unwrap();
    assert_eq!(index.label.as_deref(), Some("polished"));
    let api = run.artifacts.iter().find(|a| a.path == "docs/api.rs").unwrap();
    assert_eq!(api.language.as_deref(), Some("rust"));

    // Per-phase records keep what each phase produced
    assert_eq!(run.history[0].artifacts.len(), 2);
    assert_eq!(run.history[1].artifacts.len(), 2);
}

/// Test that a halted run still reports what it produced so far
#[tokio::test]
async fn test_halted_run_keeps_artifacts() {
    let process = process_from_yaml(REVIEW_PROCESS);
    let agent = review_agent(10);
    let engine = engine(&agent);
    let result = engine
        .run(&process, json!({ "topic": "traits" }))
        .await
        .unwrap();

    assert_eq!(result.status, phaseflow::RunStatus::Halted);
    let paths: Vec<&str> = result.artifacts.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["draft.md", "review.json"]);
}

/// Test that a malformed artifact list halts the run
#[tokio::test]
async fn test_malformed_artifacts_halt() {
    let process = process_from_yaml(BUILD_PROCESS);
    let agent = Arc::new(
        MockAgent::new()
            .reply("render", json!({ "artifacts": [{ "path": "ok.md" }, { "format": "text" }] }))
            .reply("polish", json!({})),
    );
    let run = engine(&agent).start(&process, json!({})).await.unwrap();

    assert_halted(&run, RunErrorKind::SchemaError);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.code, ARTIFACTS_INVALID);
    assert_eq!(failure.field.as_deref(), Some("$.artifacts[1].path"));
    assert_eq!(agent.calls("polish"), 0);
    assert!(run.artifacts.is_empty());
}
