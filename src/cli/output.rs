//! CLI output formatting

use crate::{
    core::{
        breakpoint::{BreakpointPayload, Decision},
        gate::GateDecision,
        task::InvocationStatus,
        PhaseStatus, RunResult, RunStatus,
    },
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "|| ");

/// Progress bar over the phases of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::NotStarted => style("NOT STARTED").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::AwaitingBreakpoint => style("AWAITING BREAKPOINT").blue().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Halted => style("HALTED").red().to_string(),
        RunStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn status_icon(status: RunStatus) -> Emoji<'static, 'static> {
    match status {
        RunStatus::Completed => CHECK,
        RunStatus::Halted => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::AwaitingBreakpoint => PAUSE,
        _ => INFO,
    }
}

fn short_id(id: &impl ToString) -> String {
    id.to_string().chars().take(8).collect()
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut line = format!(
        "{} {} - {} - {} ({} phases)",
        status_icon(summary.status),
        style(short_id(&summary.run_id)).dim(),
        style(&summary.process_id).bold(),
        format_status(summary.status),
        summary.phases_run,
    );
    if let Some(code) = &summary.failure_code {
        line.push_str(&format!(" - {}", style(code).red()));
    }
    line
}

/// Format an execution event for display; `None` for events not worth a line
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted { run_id, process_id } => format!(
            "{} Starting {} ({})",
            ROCKET,
            style(process_id).bold(),
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::RunResumed { run_id, .. } => format!(
            "{} Resuming run {}",
            ROCKET,
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::PhaseStarted { phase_id, .. } => {
            format!("{} {}", SPINNER, style(phase_id).cyan())
        }
        ExecutionEvent::InvocationCreated { .. } => return None,
        ExecutionEvent::InvocationResolved {
            phase_id, status, ..
        } => match status {
            InvocationStatus::Failed => format!(
                "{} {}: delegation failed",
                CROSS,
                style(phase_id).red()
            ),
            _ => return None,
        },
        ExecutionEvent::GateEvaluated { phase_id, decision } => match decision {
            GateDecision::Continue { reason } => {
                format!("{} {} gate: {}", INFO, style(phase_id).dim(), style(reason).green())
            }
            GateDecision::Branch { reason, phases } => format!(
                "{} {} gate: {} → {}",
                WARN,
                style(phase_id).yellow(),
                style(reason).dim(),
                style(phases.join(", ")).cyan()
            ),
            GateDecision::Halt { code, reason } => format!(
                "{} {} gate: {} ({})",
                CROSS,
                style(phase_id).red(),
                reason,
                style(code).dim()
            ),
        },
        ExecutionEvent::PlanChanged { phase_id, plan } => format!(
            "{} {} → {}",
            INFO,
            style(phase_id).dim(),
            style(plan.join(", ")).cyan()
        ),
        ExecutionEvent::BreakpointCreated { payload, .. } => format!(
            "{} Breakpoint: {}",
            PAUSE,
            style(&payload.title).bold()
        ),
        ExecutionEvent::BreakpointResolved { decision, .. } => match decision {
            Decision::Approved => format!("{} Breakpoint {}", CHECK, style("approved").green()),
            Decision::Rejected => format!("{} Breakpoint {}", CROSS, style("rejected").red()),
        },
        ExecutionEvent::PhaseCompleted {
            phase_id, status, ..
        } => match status {
            PhaseStatus::Completed | PhaseStatus::Branched => {
                format!("{} {}", CHECK, style(phase_id).green())
            }
            PhaseStatus::AwaitingBreakpoint => {
                format!("{} {} (awaiting review)", PAUSE, style(phase_id).blue())
            }
            PhaseStatus::Halted | PhaseStatus::Cancelled => {
                format!("{} {}", CROSS, style(phase_id).red())
            }
        },
        ExecutionEvent::RunFinished { run_id, status } => format!(
            "{} Run ({}) {}",
            status_icon(*status),
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// Human-readable breakpoint for review
pub fn format_breakpoint(payload: &BreakpointPayload) -> String {
    let mut out = format!(
        "{} {}\n  {}\n",
        PAUSE,
        style(&payload.title).bold(),
        payload.question
    );
    if !payload.context.summary.is_empty() {
        out.push_str(&format!("  {}\n", style("Summary:").bold()));
        for (name, value) in &payload.context.summary {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&format!("    {}: {}\n", style(name).cyan(), format_output(&rendered, 5)));
        }
    }
    if !payload.context.files.is_empty() {
        out.push_str(&format!("  {}\n", style("Files:").bold()));
        for file in &payload.context.files {
            out.push_str(&format!("    {} {}\n", file.path, style(&file.format).dim()));
        }
    }
    out
}

/// Final line(s) for a finished or suspended run
pub fn format_run_result(name: &str, result: &RunResult) -> String {
    match result.status {
        RunStatus::Completed => format!(
            "{} {} completed {} in {}",
            CHECK,
            style(name).bold(),
            style("successfully").green(),
            format_duration(Duration::from_secs_f64(result.duration))
        ),
        RunStatus::AwaitingBreakpoint => {
            let breakpoint = result
                .metadata
                .breakpoint_id
                .map(|id| id.to_string())
                .unwrap_or_default();
            format!(
                "{} {} is waiting on breakpoint {}\n  resume with: phaseflow resume --run-id {} --file <process.yaml>",
                PAUSE,
                style(name).bold(),
                style(breakpoint).dim(),
                result.metadata.run_id
            )
        }
        status => {
            let mut line = format!("{} {} {}", CROSS, style(name).bold(), format_status(status));
            if let Some(error) = &result.error {
                line.push_str(&format!("\n  {}", style(error).red()));
            }
            line
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format long text with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
