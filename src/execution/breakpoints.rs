//! Breakpoint handlers - how the executor waits for a human decision

use crate::core::breakpoint::{Breakpoint, Resolution};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// What the executor should do with a raised breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointDisposition {
    /// A decision is available now
    Resolved(Resolution),
    /// Persist the run as `AwaitingBreakpoint` and return to the caller
    Park,
    /// The run was cancelled while waiting
    Cancelled,
}

/// Decides how a breakpoint is resolved
#[async_trait]
pub trait BreakpointHandler: Send + Sync {
    async fn on_breakpoint(&self, breakpoint: &Breakpoint) -> BreakpointDisposition;
}

/// Approves every breakpoint immediately
#[derive(Debug, Clone, Default)]
pub struct AutoApprove;

#[async_trait]
impl BreakpointHandler for AutoApprove {
    async fn on_breakpoint(&self, breakpoint: &Breakpoint) -> BreakpointDisposition {
        info!("Auto-approving breakpoint '{}'", breakpoint.title);
        BreakpointDisposition::Resolved(Resolution::approve().by("auto-approve"))
    }
}

/// Answers every breakpoint with the same resolution
#[derive(Debug, Clone)]
pub struct FixedResolution(pub Resolution);

#[async_trait]
impl BreakpointHandler for FixedResolution {
    async fn on_breakpoint(&self, _breakpoint: &Breakpoint) -> BreakpointDisposition {
        BreakpointDisposition::Resolved(self.0.clone())
    }
}

/// Parks the run; a later `resume` supplies the decision
#[derive(Debug, Clone, Default)]
pub struct ParkingHandler;

#[async_trait]
impl BreakpointHandler for ParkingHandler {
    async fn on_breakpoint(&self, breakpoint: &Breakpoint) -> BreakpointDisposition {
        info!(
            "Parking run {} on breakpoint {}",
            breakpoint.context.run_id, breakpoint.id
        );
        BreakpointDisposition::Park
    }
}

/// A breakpoint published to a review surface, awaiting its answer
#[derive(Debug)]
pub struct PendingBreakpoint {
    pub breakpoint: Breakpoint,
    responder: oneshot::Sender<Resolution>,
}

impl PendingBreakpoint {
    /// Answer the breakpoint. Fails if the run stopped waiting.
    pub fn resolve(self, resolution: Resolution) -> Result<(), Resolution> {
        self.responder.send(resolution)
    }
}

/// Publishes breakpoints over a channel and waits, without timeout, for the answer
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::Sender<PendingBreakpoint>,
}

impl ChannelHandler {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PendingBreakpoint>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl BreakpointHandler for ChannelHandler {
    async fn on_breakpoint(&self, breakpoint: &Breakpoint) -> BreakpointDisposition {
        let (responder, answer) = oneshot::channel();
        let pending = PendingBreakpoint {
            breakpoint: breakpoint.clone(),
            responder,
        };

        if self.sender.send(pending).await.is_err() {
            debug!("No review surface listening, parking breakpoint {}", breakpoint.id);
            return BreakpointDisposition::Park;
        }

        match answer.await {
            Ok(resolution) => BreakpointDisposition::Resolved(resolution),
            Err(_) => {
                debug!("Reviewer dropped breakpoint {}, parking", breakpoint.id);
                BreakpointDisposition::Park
            }
        }
    }
}
