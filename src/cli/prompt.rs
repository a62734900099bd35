//! Interactive breakpoint resolution on the terminal

use crate::cli::output::{format_breakpoint, style};
use crate::core::breakpoint::{Breakpoint, Decision, Resolution};
use crate::execution::{BreakpointDisposition, BreakpointHandler};
use async_trait::async_trait;
use console::Term;
use tracing::warn;

/// Asks the reviewer on stderr and reads the answer from the terminal.
///
/// Falls back to parking the run when no terminal is attached or input
/// cannot be read.
#[derive(Debug, Clone)]
pub struct ConsolePrompt {
    reviewer: Option<String>,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self {
            reviewer: std::env::var("USER").ok(),
        }
    }
}

impl Default for ConsolePrompt {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret a typed answer; `None` when it is neither approve nor reject
pub fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "a" | "approve" => Some(true),
        "n" | "no" | "r" | "reject" => Some(false),
        _ => None,
    }
}

fn ask(term: &Term, text: &str) -> std::io::Result<String> {
    term.write_str(text)?;
    term.read_line()
}

fn prompt_blocking(breakpoint: &Breakpoint) -> std::io::Result<Option<(bool, String)>> {
    let term = Term::stderr();
    if !term.is_term() {
        return Ok(None);
    }

    term.write_line("")?;
    term.write_line(&format_breakpoint(&breakpoint.payload()))?;

    let approved = loop {
        let answer = ask(&term, &format!("{} ", style("Approve? [y/n]").bold()))?;
        match parse_answer(&answer) {
            Some(approved) => break approved,
            None => term.write_line("Please answer y or n")?,
        }
    };
    let comments = ask(&term, "Comments (optional): ")?;
    Ok(Some((approved, comments.trim().to_string())))
}

#[async_trait]
impl BreakpointHandler for ConsolePrompt {
    async fn on_breakpoint(&self, breakpoint: &Breakpoint) -> BreakpointDisposition {
        let owned = breakpoint.clone();
        let answer = tokio::task::spawn_blocking(move || prompt_blocking(&owned)).await;

        let (approved, comments) = match answer {
            Ok(Ok(Some(answer))) => answer,
            Ok(Ok(None)) => return BreakpointDisposition::Park,
            Ok(Err(err)) => {
                warn!("Cannot read breakpoint answer: {}", err);
                return BreakpointDisposition::Park;
            }
            Err(err) => {
                warn!("Breakpoint prompt failed: {}", err);
                return BreakpointDisposition::Park;
            }
        };

        BreakpointDisposition::Resolved(Resolution {
            decision: if approved {
                Decision::Approved
            } else {
                Decision::Rejected
            },
            comments: Some(comments).filter(|c| !c.is_empty()),
            resolved_by: self.reviewer.clone(),
        })
    }
}
