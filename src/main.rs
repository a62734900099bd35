use phaseflow::agent::SubprocessAgent;
use phaseflow::cli::commands::{
    AgentArgs, BreakpointCommand, BreakpointMode, HistoryCommand, ListCommand, ResumeCommand,
    RunCommand, StrategyArg, ValidateCommand,
};
use phaseflow::cli::output::*;
use phaseflow::cli::prompt::ConsolePrompt;
use phaseflow::cli::{Cli, Command};
use phaseflow::core::{config::ProcessConfig, PipelineRun, Process, RunStatus};
use phaseflow::execution::{
    AutoApprove, BreakpointHandler, ExecutionEngine, ExecutionEvent, ParkingHandler,
};
use phaseflow::persistence::{FsEffectStore, PersistenceBackend, RunSummary};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    let data_dir = cli.data_dir();
    match &cli.command {
        Command::Run(cmd) => run_process(cmd, &data_dir).await?,
        Command::Validate(cmd) => validate_process(cmd)?,
        Command::List(cmd) => list_processes(cmd, &data_dir).await?,
        Command::History(cmd) => show_history(cmd, &data_dir).await?,
        Command::Resume(cmd) => resume_run(cmd, &data_dir).await?,
        Command::Breakpoint(cmd) => show_breakpoint(cmd, &data_dir).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn open_history(data_dir: &Path) -> Result<Arc<dyn PersistenceBackend>> {
    let store = phaseflow::persistence::SqliteRunStore::in_dir(data_dir).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn open_history(_data_dir: &Path) -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without sqlite, run history is kept in memory only");
    Ok(Arc::new(phaseflow::persistence::InMemoryPersistence::new()))
}

fn load_process(path: &Path) -> Result<Process> {
    let config = ProcessConfig::from_file(path).context("Failed to load process definition")?;
    config.to_process()
}

fn breakpoint_handler(mode: BreakpointMode) -> Arc<dyn BreakpointHandler> {
    match mode {
        BreakpointMode::Auto => Arc::new(AutoApprove),
        BreakpointMode::Park => Arc::new(ParkingHandler),
        BreakpointMode::Prompt => Arc::new(ConsolePrompt::new()),
    }
}

fn build_engine(
    agent: &AgentArgs,
    strategy: StrategyArg,
    concurrency: usize,
    mode: BreakpointMode,
    data_dir: &Path,
    history: Option<Arc<dyn PersistenceBackend>>,
) -> ExecutionEngine<SubprocessAgent> {
    let agent = SubprocessAgent::new(agent.to_config());
    let store = Arc::new(FsEffectStore::new(data_dir));
    let mut engine =
        ExecutionEngine::with_effect_store(agent, strategy.to_strategy(concurrency), store)
            .with_breakpoint_handler(breakpoint_handler(mode));
    if let Some(history) = history {
        engine = engine.with_persistence(history);
    }

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            token.cancel();
        }
    });
    engine
}

/// Print events above a progress bar over the phases
fn attach_progress(engine: &ExecutionEngine<SubprocessAgent>, process: &Process) -> ProgressBar {
    let progress = create_progress_bar(process.default_plan().len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if let Some(line) = format_execution_event(&event) {
            bar.println(line);
        }
        match &event {
            ExecutionEvent::PhaseStarted { phase_id, .. } => {
                if bar.length().map_or(false, |len| bar.position() >= len) {
                    bar.inc_length(1);
                }
                bar.set_message(phase_id.clone());
            }
            ExecutionEvent::PhaseCompleted { .. } => bar.inc(1),
            _ => {}
        }
    });
    progress
}

fn report(process: &Process, run: &PipelineRun, json: bool) -> Result<()> {
    let result = run.to_result(chrono::Utc::now());
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("\n{}", format_run_result(&process.name, &result));
        if !result.artifacts.is_empty() {
            println!("  {}", style("Artifacts:").bold());
            for artifact in &result.artifacts {
                println!("    {}", artifact.path);
            }
        }
    }

    match run.status {
        RunStatus::Completed | RunStatus::AwaitingBreakpoint => Ok(()),
        _ => {
            if let Some(failure) = &run.failure {
                error!("{}", failure);
            }
            std::process::exit(1);
        }
    }
}

async fn run_process(cmd: &RunCommand, data_dir: &Path) -> Result<()> {
    let process = load_process(&cmd.file)?;
    let inputs = cmd.inputs()?;

    if !cmd.json {
        println!("{} Loaded process: {}", INFO, style(&process.name).bold());
    }

    let history = if cmd.no_history {
        None
    } else {
        Some(open_history(data_dir).await?)
    };
    let engine = build_engine(
        &cmd.agent,
        cmd.strategy,
        cmd.concurrency,
        cmd.breakpoints,
        data_dir,
        history,
    );

    let progress = (!cmd.json).then(|| attach_progress(&engine, &process));
    let run = engine.start(&process, inputs).await?;
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    report(&process, &run, cmd.json)
}

async fn resume_run(cmd: &ResumeCommand, data_dir: &Path) -> Result<()> {
    let process = load_process(&cmd.file)?;
    let run_id = Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;
    let history = open_history(data_dir).await?;
    let run = history
        .load_run(run_id)
        .await?
        .with_context(|| format!("Run {} not found", run_id))?;

    let engine = build_engine(
        &cmd.agent,
        cmd.strategy,
        cmd.concurrency,
        cmd.breakpoints,
        data_dir,
        Some(history),
    );
    let progress = (!cmd.json).then(|| attach_progress(&engine, &process));

    let resolution = cmd.resolution();
    let run = match &cmd.breakpoint_id {
        Some(id) => {
            let breakpoint_id = Uuid::parse_str(id).context("Invalid breakpoint ID format")?;
            engine
                .resume_breakpoint(&process, run, breakpoint_id, resolution)
                .await?
        }
        None => engine.resume(&process, run, resolution).await?,
    };
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    report(&process, &run, cmd.json)
}

async fn show_breakpoint(cmd: &BreakpointCommand, data_dir: &Path) -> Result<()> {
    let run_id = Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;
    let history = open_history(data_dir).await?;
    let run = history
        .load_run(run_id)
        .await?
        .with_context(|| format!("Run {} not found", run_id))?;

    match &run.pending_breakpoint {
        Some(breakpoint) => {
            println!("{}", format_breakpoint(&breakpoint.payload()));
            println!("  Breakpoint ID: {}", style(breakpoint.id).cyan());
            println!("  Phase: {}", style(&breakpoint.phase_id).bold());
        }
        None => println!(
            "{} Run {} is {}, no breakpoint pending",
            INFO,
            style(run_id).dim(),
            format_status(run.status)
        ),
    }
    Ok(())
}

fn validate_process(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating process...", INFO);

    let result = ProcessConfig::from_file(&cmd.file).and_then(|config| {
        let process = config.to_process()?;
        Ok((config, process))
    });

    match result {
        Ok((config, process)) => {
            println!("{} Process definition is valid!", CHECK);
            println!("  Name: {}", style(&process.name).bold());
            println!("  Id: {}", style(&process.id).dim());
            println!("  Tasks: {}", style(process.tasks.len()).cyan());
            println!("  Phases: {}", style(process.len()).cyan());
            println!("  Outputs: {}", style(process.outputs.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_processes(cmd: &ListCommand, data_dir: &Path) -> Result<()> {
    let store = open_history(data_dir).await?;
    let processes = store.list_processes().await?;

    if processes.is_empty() {
        println!("{} No processes found in history", INFO);
        return Ok(());
    }

    let mut json_data = Vec::new();
    println!("{} Processes in history:", INFO);

    for process_id in &processes {
        let runs = store.list_runs(process_id).await?;

        if cmd.with_counts {
            let completed = runs.iter().filter(|r| r.status == RunStatus::Completed).count();
            let halted = runs.iter().filter(|r| r.status == RunStatus::Halted).count();
            let waiting = runs
                .iter()
                .filter(|r| r.status == RunStatus::AwaitingBreakpoint)
                .count();
            println!(
                "  {} ({} runs: {} completed, {} halted, {} awaiting review)",
                style(process_id).bold(),
                style(runs.len()).cyan(),
                style(completed).green(),
                style(halted).red(),
                style(waiting).blue()
            );
        } else {
            println!("  {}", style(process_id).bold());
        }

        json_data.push(serde_json::json!({
            "id": process_id,
            "run_count": runs.len()
        }));
    }

    if cmd.json {
        let data = serde_json::json!({ "processes": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, data_dir: &Path) -> Result<()> {
    let store = open_history(data_dir).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(run) => print_run_details(&run, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs: Vec<RunSummary> = match &cmd.process {
        Some(process_id) => store.list_runs(process_id).await?,
        None => {
            let mut all = Vec::new();
            for process_id in store.list_processes().await? {
                all.extend(store.list_runs(&process_id).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    let runs: Vec<RunSummary> = runs.into_iter().take(cmd.limit).collect();

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(run: &PipelineRun, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(run.run_id).cyan());
    println!("  Process: {}", style(&run.process_id).bold());
    println!("  Status: {}", format_status(run.status));
    println!("  Started: {}", style(run.started_at.to_rfc3339()).dim());
    if let Some(finished) = run.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(run.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }

    println!("  Phases:");
    for record in &run.history {
        let gate = record
            .gate
            .as_ref()
            .map(|g| format!(" - {}", g.reason()))
            .unwrap_or_default();
        println!(
            "    {} {} {:?}{}",
            style(record.phase_index).dim(),
            style(&record.phase_id).bold(),
            record.status,
            style(gate).dim()
        );
    }

    if let Some(failure) = &run.failure {
        println!("  Failure: {}", style(failure).red());
    }
    if let Some(breakpoint) = &run.pending_breakpoint {
        println!("  Waiting on breakpoint {}", style(breakpoint.id).cyan());
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(run)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
