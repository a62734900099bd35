//! CLI command definitions

use crate::agent::AgentClientConfig;
use crate::core::breakpoint::{Decision, Resolution};
use crate::execution::SchedulingStrategy;
use anyhow::{Context, Result};
use clap::Args;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Worker command used for delegated tasks
#[derive(Debug, Args, Clone, Default)]
pub struct AgentArgs {
    /// Worker executable (defaults to `phaseflow-agent` on PATH)
    #[arg(long)]
    pub agent_command: Option<String>,

    /// Extra argument for the worker (repeatable)
    #[arg(long = "agent-arg")]
    pub agent_args: Vec<String>,

    /// Per-delegation timeout in seconds, when the phase sets none
    #[arg(long)]
    pub agent_timeout: Option<u64>,
}

impl AgentArgs {
    pub fn to_config(&self) -> AgentClientConfig {
        let mut config = AgentClientConfig::default().with_args(self.agent_args.clone());
        if let Some(command) = &self.agent_command {
            config = config.with_command(command.clone());
        }
        if let Some(timeout) = self.agent_timeout {
            config = config.with_timeout(timeout);
        }
        config
    }
}

/// Run a process
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to process YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Input value (key=value, value parsed as JSON when possible)
    #[arg(long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// JSON or YAML file with the run inputs
    #[arg(long)]
    pub inputs_file: Option<PathBuf>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Sequential)]
    pub strategy: StrategyArg,

    /// Concurrency limit for the limited strategy
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// How breakpoints are resolved
    #[arg(long, value_enum, default_value_t = BreakpointMode::Prompt)]
    pub breakpoints: BreakpointMode,

    #[command(flatten)]
    pub agent: AgentArgs,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    /// Inputs file first, then `--input` overrides
    pub fn inputs(&self) -> Result<Value> {
        let mut inputs = match &self.inputs_file {
            Some(path) => read_inputs_file(path)?,
            None => Map::new(),
        };
        for (key, value) in &self.input {
            inputs.insert(key.clone(), parse_input_value(value));
        }
        Ok(Value::Object(inputs))
    }
}

/// Validate a process definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to process YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List processes with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Process id to filter by
    #[arg(short, long)]
    pub process: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Resolve a pending breakpoint and continue the run
#[derive(Debug, Args, Clone)]
pub struct ResumeCommand {
    /// Path to the process YAML file the run was started from
    #[arg(short, long)]
    pub file: PathBuf,

    /// Run waiting on a breakpoint
    #[arg(long)]
    pub run_id: String,

    /// Breakpoint being answered (checked against the pending one)
    #[arg(long)]
    pub breakpoint_id: Option<String>,

    /// Reject instead of approve
    #[arg(long)]
    pub reject: bool,

    /// Reviewer comments
    #[arg(long)]
    pub comments: Option<String>,

    /// Reviewer name
    #[arg(long)]
    pub reviewer: Option<String>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Sequential)]
    pub strategy: StrategyArg,

    /// Concurrency limit for the limited strategy
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// How later breakpoints are resolved
    #[arg(long, value_enum, default_value_t = BreakpointMode::Prompt)]
    pub breakpoints: BreakpointMode,

    #[command(flatten)]
    pub agent: AgentArgs,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

impl ResumeCommand {
    pub fn resolution(&self) -> Resolution {
        Resolution {
            decision: if self.reject {
                Decision::Rejected
            } else {
                Decision::Approved
            },
            comments: self.comments.clone(),
            resolved_by: self.reviewer.clone(),
        }
    }
}

/// Show the breakpoint a run is waiting on
#[derive(Debug, Args, Clone)]
pub struct BreakpointCommand {
    /// Run to inspect
    #[arg(long)]
    pub run_id: String,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl StrategyArg {
    pub fn to_strategy(self, concurrency: usize) -> SchedulingStrategy {
        match self {
            StrategyArg::Sequential => SchedulingStrategy::Sequential,
            StrategyArg::Parallel => SchedulingStrategy::Parallel,
            StrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(concurrency),
        }
    }
}

/// Breakpoint resolution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BreakpointMode {
    /// Approve every breakpoint
    Auto,
    /// Suspend the run; answer later with `phaseflow resume`
    Park,
    /// Ask on the terminal
    Prompt,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// JSON when it parses, a plain string otherwise
pub fn parse_input_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn read_inputs_file(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read inputs file {}", path.display()))?;
    // YAML is a superset of JSON
    let value: Value = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse inputs file {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => anyhow::bail!("Inputs file {} must contain a mapping", path.display()),
    }
}
