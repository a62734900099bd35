//! Run context - what a running process may touch
//!
//! Passed explicitly to every phase: the clock, the run's tracing span, the
//! task invoker, the breakpoint handler and the cancellation token.

use crate::{
    agent::AgentExecutor,
    core::{
        breakpoint::Breakpoint,
        task::{Invocation, TaskDefinition},
    },
    execution::{
        breakpoints::{BreakpointDisposition, BreakpointHandler},
        invoker::{InvocationError, InvocationRequest, TaskInvoker},
    },
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

/// Source of timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-run handle to the engine's collaborators
pub struct RunContext<'e, A> {
    pub run_id: Uuid,
    pub process_id: String,
    clock: Arc<dyn Clock>,
    span: Span,
    invoker: &'e TaskInvoker<A>,
    breakpoints: &'e dyn BreakpointHandler,
    cancel: CancellationToken,
}

impl<'e, A: AgentExecutor> RunContext<'e, A> {
    pub fn new(
        run_id: Uuid,
        process_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        invoker: &'e TaskInvoker<A>,
        breakpoints: &'e dyn BreakpointHandler,
        cancel: CancellationToken,
    ) -> Self {
        let process_id = process_id.into();
        let span = tracing::info_span!("run", run_id = %run_id, process = %process_id);
        Self {
            run_id,
            process_id,
            clock,
            span,
            invoker,
            breakpoints,
            cancel,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Logging sink for everything that happens in this run
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one task invocation
    pub async fn task(
        &self,
        definition: &TaskDefinition,
        request: InvocationRequest,
    ) -> Result<Invocation, InvocationError> {
        self.invoker.invoke(definition, request, &self.cancel).await
    }

    /// Hand a breakpoint to the handler; cancellation ends the wait
    pub async fn breakpoint(&self, breakpoint: &Breakpoint) -> BreakpointDisposition {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => BreakpointDisposition::Cancelled,
            disposition = self.breakpoints.on_breakpoint(breakpoint) => disposition,
        }
    }
}
