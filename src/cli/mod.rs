//! Command-line interface

pub mod commands;
pub mod output;
pub mod prompt;

use clap::{Parser, Subcommand};
use commands::{
    BreakpointCommand, HistoryCommand, ListCommand, ResumeCommand, RunCommand, ValidateCommand,
};
use std::ffi::OsString;
use std::path::PathBuf;

/// Phase-based process orchestration for agent-delegated tasks
#[derive(Debug, Parser, Clone)]
#[command(name = "phaseflow")]
#[command(version)]
#[command(about = "Run schema-validated, gated processes whose phases are delegated to agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory for run history and task payloads
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a process
    Run(RunCommand),

    /// Validate a process definition
    Validate(ValidateCommand),

    /// List processes with recorded runs
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),

    /// Resolve a pending breakpoint and continue the run
    Resume(ResumeCommand),

    /// Show the breakpoint a run is waiting on
    Breakpoint(BreakpointCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    /// Data directory, defaulting to the platform location
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(crate::default_data_dir)
    }
}
