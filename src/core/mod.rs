//! Core domain models for processes
//!
//! This module defines the fundamental data structures that represent
//! processes, phases, tasks and runs, plus the pure pieces of the engine:
//! schema validation, bindings, quality gates and artifact aggregation.

pub mod artifact;
pub mod binding;
pub mod breakpoint;
pub mod config;
pub mod context;
pub mod gate;
pub mod process;
pub mod run;
pub mod schema;
pub mod state;
pub mod step;
pub mod task;

pub use context::*;
pub use process::*;
pub use run::*;
pub use state::*;
pub use step::*;
