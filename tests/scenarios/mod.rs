//! Scenario-based tests for phaseflow

mod artifacts;
mod breakpoints;
mod event_ordering;
mod gates;
mod happy_path;
mod idempotence;
mod schema_errors;
