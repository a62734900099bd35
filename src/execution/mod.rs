//! Process execution engine

pub mod breakpoints;
pub mod context;
pub mod engine;
pub mod invoker;
pub mod scheduler;

pub use breakpoints::{
    AutoApprove, BreakpointDisposition, BreakpointHandler, ChannelHandler, FixedResolution,
    ParkingHandler, PendingBreakpoint,
};
pub use context::{Clock, ManualClock, RunContext, SystemClock};
pub use engine::{EngineError, EventHandler, ExecutionEngine, ExecutionEvent};
pub use invoker::{InvocationError, InvocationRequest, TaskInvoker};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
