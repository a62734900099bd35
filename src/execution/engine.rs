//! Main execution engine - orchestrates a process run
//!
//! The engine owns the run state. Phases are taken off the plan in batches,
//! their inputs bound against a snapshot of completed outputs, invoked,
//! gated, and finally applied to the run in plan order.

use crate::{
    agent::AgentExecutor,
    core::{
        artifact::{extract_artifacts, ArtifactManifest},
        binding::BindingError,
        breakpoint::{
            Breakpoint, BreakpointContext, BreakpointError, BreakpointPayload, BreakpointSpec,
            Decision, Resolution,
        },
        gate::{self, GateDecision},
        schema,
        task::{EffectId, Invocation, InvocationStatus},
        Phase, PhaseRecord, PhaseStatus, PipelineContext, PipelineRun, Process, RunErrorKind,
        RunFailure, RunResult, RunStatus,
    },
    execution::{
        breakpoints::{BreakpointDisposition, BreakpointHandler, ParkingHandler},
        context::{Clock, RunContext, SystemClock},
        invoker::{InvocationError, InvocationRequest, TaskInvoker},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
    },
    persistence::{EffectStore, InMemoryEffectStore, PersistenceBackend},
};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Declared outputs could not be bound at completion
pub const OUTPUT_UNRESOLVED: &str = "OUTPUT_UNRESOLVED";

/// A breakpoint summary could not be bound
pub const SUMMARY_UNRESOLVED: &str = "SUMMARY_UNRESOLVED";

/// Malformed artifact list in a phase output
pub const ARTIFACTS_INVALID: &str = "ARTIFACTS_INVALID";

/// Branch loops exceeded the process bound
pub const PHASE_LIMIT_EXCEEDED: &str = "PHASE_LIMIT_EXCEEDED";

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        process_id: String,
    },
    RunResumed {
        run_id: Uuid,
        breakpoint_id: Uuid,
    },
    PhaseStarted {
        phase_id: String,
        phase_index: usize,
    },
    InvocationCreated {
        phase_id: String,
        effect_id: EffectId,
        task: String,
    },
    InvocationResolved {
        phase_id: String,
        effect_id: EffectId,
        status: InvocationStatus,
    },
    GateEvaluated {
        phase_id: String,
        decision: GateDecision,
    },
    PlanChanged {
        phase_id: String,
        plan: Vec<String>,
    },
    BreakpointCreated {
        breakpoint_id: Uuid,
        phase_id: String,
        payload: BreakpointPayload,
    },
    BreakpointResolved {
        breakpoint_id: Uuid,
        decision: Decision,
    },
    PhaseCompleted {
        phase_id: String,
        phase_index: usize,
        status: PhaseStatus,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Errors that prevent the engine from resuming a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run {run_id} is {status}, not awaiting a breakpoint")]
    NotAwaiting { run_id: Uuid, status: RunStatus },

    #[error("run {run_id} belongs to process '{expected}', not '{given}'")]
    ProcessMismatch {
        run_id: Uuid,
        expected: String,
        given: String,
    },

    #[error(transparent)]
    Breakpoint(#[from] BreakpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of running one phase, before it is applied to the run
struct PhaseExecution {
    record: PhaseRecord,
    failure: Option<RunFailure>,
}

impl PhaseExecution {
    fn halted(mut record: PhaseRecord, failure: RunFailure, at: chrono::DateTime<chrono::Utc>) -> Self {
        record.status = if failure.kind == RunErrorKind::Cancelled {
            PhaseStatus::Cancelled
        } else {
            PhaseStatus::Halted
        };
        record.output = None;
        record.artifacts.clear();
        record.finished_at = at;
        Self {
            record,
            failure: Some(failure),
        }
    }
}

/// Main process execution engine
pub struct ExecutionEngine<A> {
    scheduler: ExecutionScheduler,
    invoker: TaskInvoker<A>,
    breakpoints: Arc<dyn BreakpointHandler>,
    persistence: Option<Arc<dyn PersistenceBackend>>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    event_handlers: Mutex<Vec<EventHandler>>,
}

impl<A: AgentExecutor> ExecutionEngine<A> {
    /// Engine with in-memory payload storage that parks on breakpoints
    pub fn new(agent: A, strategy: SchedulingStrategy) -> Self {
        Self::with_effect_store(agent, strategy, Arc::new(InMemoryEffectStore::new()))
    }

    pub fn with_effect_store(
        agent: A,
        strategy: SchedulingStrategy,
        store: Arc<dyn EffectStore>,
    ) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            invoker: TaskInvoker::new(agent, store),
            breakpoints: Arc::new(ParkingHandler),
            persistence: None,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
            event_handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_breakpoint_handler(mut self, handler: Arc<dyn BreakpointHandler>) -> Self {
        self.breakpoints = handler;
        self
    }

    /// Save a run snapshot after every batch
    pub fn with_persistence(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.persistence = Some(backend);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels every run of this engine
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn invoker(&self) -> &TaskInvoker<A> {
        &self.invoker
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.event_handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        let handlers: Vec<EventHandler> = self
            .event_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    fn context(&self, process: &Process, run: &PipelineRun) -> RunContext<'_, A> {
        RunContext::new(
            run.run_id,
            process.id.clone(),
            self.clock.clone(),
            &self.invoker,
            self.breakpoints.as_ref(),
            self.cancel.clone(),
        )
    }

    /// Run a process to completion (or suspension) and return its result
    pub async fn run(&self, process: &Process, inputs: Value) -> Result<RunResult> {
        let run = self.start(process, inputs).await?;
        Ok(run.to_result(self.clock.now()))
    }

    /// Start a new run of a process
    pub async fn start(&self, process: &Process, inputs: Value) -> Result<PipelineRun> {
        let run = PipelineRun::new(
            process.id.clone(),
            inputs,
            process.default_plan(),
            self.clock.now(),
        );
        self.start_run(process, run).await
    }

    /// Start a prepared run
    pub async fn start_run(&self, process: &Process, mut run: PipelineRun) -> Result<PipelineRun> {
        let ctx = self.context(process, &run);
        let span = ctx.span().clone();
        self.begin(&ctx, process, &mut run).instrument(span).await?;
        Ok(run)
    }

    async fn begin(&self, ctx: &RunContext<'_, A>, process: &Process, run: &mut PipelineRun) -> Result<()> {
        info!("Starting run of process '{}'", process.name);
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.run_id,
            process_id: process.id.clone(),
        });
        run.status = RunStatus::Running;

        if let Err(err) = schema::validate(&process.input_contract, &run.inputs) {
            let failure = RunFailure::new(
                RunErrorKind::InvalidInput,
                format!("process inputs violate the contract at {}", err),
            )
            .with_field(err.path.clone());
            self.halt(ctx, run, failure);
        }

        self.drive(ctx, process, run).await
    }

    /// Resume a run suspended on a breakpoint
    pub async fn resume(
        &self,
        process: &Process,
        mut run: PipelineRun,
        resolution: Resolution,
    ) -> Result<PipelineRun, EngineError> {
        if run.status != RunStatus::AwaitingBreakpoint {
            return Err(EngineError::NotAwaiting {
                run_id: run.run_id,
                status: run.status,
            });
        }
        if run.process_id != process.id {
            return Err(EngineError::ProcessMismatch {
                run_id: run.run_id,
                expected: run.process_id.clone(),
                given: process.id.clone(),
            });
        }
        let Some(breakpoint) = run.pending_breakpoint.take() else {
            return Err(EngineError::NotAwaiting {
                run_id: run.run_id,
                status: run.status,
            });
        };

        let ctx = self.context(process, &run);
        let span = ctx.span().clone();
        self.continue_after(&ctx, process, &mut run, breakpoint, resolution)
            .instrument(span)
            .await?;
        Ok(run)
    }

    /// Resume, checking that the resolution targets the pending breakpoint
    pub async fn resume_breakpoint(
        &self,
        process: &Process,
        run: PipelineRun,
        breakpoint_id: Uuid,
        resolution: Resolution,
    ) -> Result<PipelineRun, EngineError> {
        if let Some(pending) = &run.pending_breakpoint {
            if pending.id != breakpoint_id {
                return Err(BreakpointError::WrongBreakpoint {
                    expected: pending.id,
                    given: breakpoint_id,
                }
                .into());
            }
        }
        self.resume(process, run, resolution).await
    }

    async fn continue_after(
        &self,
        ctx: &RunContext<'_, A>,
        process: &Process,
        run: &mut PipelineRun,
        breakpoint: Breakpoint,
        resolution: Resolution,
    ) -> Result<(), EngineError> {
        info!("Resuming run at breakpoint {}", breakpoint.id);
        self.emit(ExecutionEvent::RunResumed {
            run_id: run.run_id,
            breakpoint_id: breakpoint.id,
        });
        run.status = RunStatus::Running;
        self.apply_resolution(ctx, process, run, breakpoint, resolution)?;
        self.drive(ctx, process, run).await?;
        Ok(())
    }

    /// Execute batches until the run finishes or suspends
    async fn drive(&self, ctx: &RunContext<'_, A>, process: &Process, run: &mut PipelineRun) -> Result<()> {
        while run.status == RunStatus::Running {
            if ctx.is_cancelled() {
                self.halt(ctx, run, RunFailure::new(RunErrorKind::Cancelled, "run was cancelled"));
                break;
            }
            if run.plan.is_empty() {
                self.complete(ctx, process, run);
                break;
            }
            if run.history.len() >= process.max_phase_runs {
                let failure = RunFailure::new(
                    RunErrorKind::GateHalt,
                    format!("run exceeded {} phase executions", process.max_phase_runs),
                )
                .with_code(PHASE_LIMIT_EXCEEDED);
                self.halt(ctx, run, failure);
                break;
            }

            let batch = self.scheduler.next_batch(process, &mut run.plan);
            let snapshot = PipelineContext::from_run(run);
            let base_index = run.next_phase_index();

            let executions: Vec<PhaseExecution> = if batch.len() == 1 {
                vec![self.execute_phase(ctx, process, &batch[0], base_index, &snapshot).await]
            } else {
                debug!("Dispatching independent batch {:?}", batch);
                stream::iter(batch.iter().enumerate())
                    .map(|(offset, phase_id)| {
                        self.execute_phase(ctx, process, phase_id, base_index + offset, &snapshot)
                    })
                    .buffered(self.scheduler.strategy().concurrency())
                    .collect()
                    .await
            };

            // Applied in plan order; the first failure halts the run
            let mut failure = None;
            let mut branches = Vec::new();
            for execution in executions {
                let record = execution.record;
                self.emit(ExecutionEvent::PhaseCompleted {
                    phase_id: record.phase_id.clone(),
                    phase_index: record.phase_index,
                    status: record.status,
                });
                if failure.is_none() {
                    failure = execution.failure;
                }
                if let Some(GateDecision::Branch { phases, .. }) = &record.gate {
                    branches.push((record.phase_id.clone(), phases.clone()));
                }
                run.record_phase(record);
            }

            if let Some(failure) = failure {
                self.halt(ctx, run, failure);
                break;
            }

            for (phase_id, phases) in branches {
                info!("Phase '{}' branches to {:?}", phase_id, phases);
                run.replace_plan(phases.clone());
                self.emit(ExecutionEvent::PlanChanged {
                    phase_id,
                    plan: phases,
                });
            }

            if let [phase_id] = batch.as_slice() {
                if let Some(spec) = process.phase(phase_id).and_then(|p| p.breakpoint.as_ref()) {
                    self.raise_breakpoint(ctx, process, run, phase_id, spec).await?;
                }
            }

            self.checkpoint(run).await?;
        }

        if run.status.is_terminal() {
            let dropped = self.invoker.forget_run(run.run_id);
            debug!("Released {} in-memory effects of run {}", dropped, run.run_id);
            info!(
                "Run finished with status {} ({} phase executions)",
                run.status,
                run.history.len()
            );
            self.emit(ExecutionEvent::RunFinished {
                run_id: run.run_id,
                status: run.status,
            });
        }
        self.checkpoint(run).await
    }

    /// Bind, invoke, validate and gate one phase
    async fn execute_phase(
        &self,
        ctx: &RunContext<'_, A>,
        process: &Process,
        phase_id: &str,
        phase_index: usize,
        snapshot: &PipelineContext,
    ) -> PhaseExecution {
        let started_at = ctx.now();
        let mut record = PhaseRecord {
            phase_id: phase_id.to_string(),
            phase_index,
            status: PhaseStatus::Completed,
            input: Value::Null,
            output: None,
            effect_ids: Vec::new(),
            artifacts: Vec::new(),
            gate: None,
            breakpoint: None,
            started_at,
            finished_at: started_at,
        };

        let Some(phase) = process.phase(phase_id) else {
            let failure = RunFailure::new(
                RunErrorKind::InvalidInput,
                format!("plan names unknown phase '{}'", phase_id),
            )
            .in_phase(phase_id);
            return PhaseExecution::halted(record, failure, ctx.now());
        };

        info!("Executing phase '{}' ({})", phase.id, phase.title);
        self.emit(ExecutionEvent::PhaseStarted {
            phase_id: phase.id.clone(),
            phase_index,
        });

        let inputs = match resolve_inputs(phase, snapshot) {
            Ok(inputs) => inputs,
            Err(failure) => return PhaseExecution::halted(record, failure, ctx.now()),
        };
        record.input = if phase.is_fan_out() {
            Value::Array(inputs.clone())
        } else {
            inputs.first().cloned().unwrap_or(Value::Null)
        };

        let requests: Vec<InvocationRequest> = inputs
            .into_iter()
            .enumerate()
            .map(|(disambiguator, input)| InvocationRequest {
                run_id: ctx.run_id,
                phase_index,
                disambiguator,
                input,
                retry: phase.retry,
                timeout: phase.timeout(),
            })
            .collect();

        for request in &requests {
            let effect_id = request.effect_id(&phase.task.name);
            record.effect_ids.push(effect_id);
            self.emit(ExecutionEvent::InvocationCreated {
                phase_id: phase.id.clone(),
                effect_id,
                task: phase.task.name.clone(),
            });
        }

        let results: Vec<Result<Invocation, InvocationError>> = stream::iter(requests)
            .map(|request| ctx.task(&phase.task, request))
            .buffered(self.scheduler.strategy().concurrency())
            .collect()
            .await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut failure = None;
        for (effect_id, result) in record.effect_ids.iter().zip(results) {
            let status = match &result {
                Ok(invocation) => invocation.status,
                Err(InvocationError::Cancelled { .. }) => InvocationStatus::Cancelled,
                Err(_) => InvocationStatus::Failed,
            };
            self.emit(ExecutionEvent::InvocationResolved {
                phase_id: phase.id.clone(),
                effect_id: *effect_id,
                status,
            });
            match result {
                Ok(invocation) => outputs.push(invocation.result.unwrap_or(Value::Null)),
                Err(err) => {
                    if failure.is_none() {
                        failure = Some(invocation_failure(phase, &err));
                    }
                }
            }
        }
        if let Some(failure) = failure {
            return PhaseExecution::halted(record, failure, ctx.now());
        }

        let output = if phase.is_fan_out() {
            Value::Array(outputs)
        } else {
            outputs.into_iter().next().unwrap_or(Value::Null)
        };

        let mut artifacts = phase.artifacts.clone();
        let sources: Vec<&Value> = match (&output, phase.is_fan_out()) {
            (Value::Array(items), true) => items.iter().collect(),
            _ => vec![&output],
        };
        for source in sources {
            match extract_artifacts(source, &phase.artifacts_field) {
                Ok(found) => artifacts.extend(found),
                Err(message) => {
                    let field = message
                        .split_once(": ")
                        .map(|(path, _)| path.to_string())
                        .unwrap_or_else(|| phase.artifacts_field.clone());
                    let failure = RunFailure::new(
                        RunErrorKind::SchemaError,
                        format!("phase '{}' reported malformed artifacts: {}", phase.id, message),
                    )
                    .with_code(ARTIFACTS_INVALID)
                    .in_phase(&phase.id)
                    .with_field(field);
                    return PhaseExecution::halted(record, failure, ctx.now());
                }
            }
        }
        record.artifacts = artifacts.into_iter().collect::<ArtifactManifest>().to_vec();

        let mut failure = None;
        if let Some(gate) = &phase.gate {
            let decision = gate::evaluate(gate, &output);
            info!("Gate on phase '{}': {}", phase.id, decision.reason());
            self.emit(ExecutionEvent::GateEvaluated {
                phase_id: phase.id.clone(),
                decision: decision.clone(),
            });
            match &decision {
                GateDecision::Continue { .. } => {}
                GateDecision::Branch { .. } => record.status = PhaseStatus::Branched,
                GateDecision::Halt { code, reason } => {
                    record.status = PhaseStatus::Halted;
                    failure = Some(
                        RunFailure::new(RunErrorKind::GateHalt, reason.clone())
                            .with_code(code.clone())
                            .in_phase(&phase.id)
                            .with_field(gate.predicate.metric.clone()),
                    );
                }
            }
            record.gate = Some(decision);
        }

        record.output = Some(output);
        record.finished_at = ctx.now();
        PhaseExecution { record, failure }
    }

    async fn raise_breakpoint(
        &self,
        ctx: &RunContext<'_, A>,
        process: &Process,
        run: &mut PipelineRun,
        phase_id: &str,
        spec: &BreakpointSpec,
    ) -> Result<()> {
        let Some(phase_index) = run.last_record().map(|r| r.phase_index) else {
            return Ok(());
        };

        let summary = match PipelineContext::from_run(run).resolve_named(&spec.summary) {
            Ok(summary) => summary,
            Err(err) => {
                let failure = summary_failure(phase_id, &err);
                self.halt(ctx, run, failure);
                return Ok(());
            }
        };

        let context = BreakpointContext {
            run_id: run.run_id,
            files: run.artifacts.to_vec(),
            summary,
        };
        let mut breakpoint = Breakpoint::new(spec, phase_id, phase_index, context, ctx.now());
        breakpoint.await_resolution()?;

        info!("Breakpoint '{}' raised after phase '{}'", breakpoint.title, phase_id);
        self.emit(ExecutionEvent::BreakpointCreated {
            breakpoint_id: breakpoint.id,
            phase_id: phase_id.to_string(),
            payload: breakpoint.payload(),
        });

        match ctx.breakpoint(&breakpoint).await {
            BreakpointDisposition::Resolved(resolution) => {
                self.apply_resolution(ctx, process, run, breakpoint, resolution)?;
            }
            BreakpointDisposition::Park => {
                if let Some(record) = run.history.last_mut() {
                    record.status = PhaseStatus::AwaitingBreakpoint;
                }
                info!("Run suspended on breakpoint {}", breakpoint.id);
                run.suspend(breakpoint);
            }
            BreakpointDisposition::Cancelled => {
                let failure = RunFailure::new(
                    RunErrorKind::Cancelled,
                    "run was cancelled while awaiting a breakpoint",
                )
                .in_phase(phase_id);
                self.halt(ctx, run, failure);
            }
        }
        Ok(())
    }

    fn apply_resolution(
        &self,
        ctx: &RunContext<'_, A>,
        process: &Process,
        run: &mut PipelineRun,
        mut breakpoint: Breakpoint,
        resolution: Resolution,
    ) -> Result<(), BreakpointError> {
        breakpoint.resolve(resolution.clone())?;

        let breakpoint_id = breakpoint.id;
        let phase_id = breakpoint.phase_id.clone();
        let phase_index = breakpoint.phase_index;
        let title = breakpoint.title.clone();
        info!("Breakpoint '{}' resolved: {:?}", title, resolution.decision);
        self.emit(ExecutionEvent::BreakpointResolved {
            breakpoint_id,
            decision: resolution.decision,
        });

        let on_reject = process
            .phase(&phase_id)
            .and_then(|p| p.breakpoint.as_ref())
            .and_then(|b| b.on_reject.clone());
        let rejected = !resolution.is_approved();

        if let Some(record) = run
            .history
            .iter_mut()
            .rev()
            .find(|r| r.phase_index == phase_index)
        {
            record.breakpoint = breakpoint.into_trace(ctx.now());
            record.status = match (rejected, &on_reject) {
                (false, _) if record.status == PhaseStatus::AwaitingBreakpoint => {
                    if record.gate.as_ref().map_or(false, |g| matches!(g, GateDecision::Branch { .. })) {
                        PhaseStatus::Branched
                    } else {
                        PhaseStatus::Completed
                    }
                }
                (false, _) => record.status,
                (true, Some(_)) => PhaseStatus::Branched,
                (true, None) => PhaseStatus::Halted,
            };
        }

        if rejected {
            match on_reject {
                Some(phases) => {
                    info!("Breakpoint rejected, running recovery phases {:?}", phases);
                    run.replace_plan(phases.clone());
                    self.emit(ExecutionEvent::PlanChanged {
                        phase_id,
                        plan: phases,
                    });
                }
                None => {
                    let message = match &resolution.comments {
                        Some(comments) => format!("breakpoint '{}' rejected: {}", title, comments),
                        None => format!("breakpoint '{}' rejected", title),
                    };
                    let failure = RunFailure::new(RunErrorKind::BreakpointRejected, message)
                        .in_phase(phase_id);
                    self.halt(ctx, run, failure);
                }
            }
        }
        Ok(())
    }

    fn complete(&self, ctx: &RunContext<'_, A>, process: &Process, run: &mut PipelineRun) {
        match PipelineContext::from_run(run).resolve_named(&process.outputs) {
            Ok(outputs) => run.complete(outputs, ctx.now()),
            Err(err) => {
                let failure = RunFailure::new(
                    RunErrorKind::SchemaError,
                    format!("declared output cannot be bound: {}", err),
                )
                .with_code(OUTPUT_UNRESOLVED)
                .with_field(err.reference());
                self.halt(ctx, run, failure);
            }
        }
    }

    fn halt(&self, ctx: &RunContext<'_, A>, run: &mut PipelineRun, failure: RunFailure) {
        warn!("Run halted: {}", failure);
        run.halt(failure, ctx.now());
    }

    async fn checkpoint(&self, run: &PipelineRun) -> Result<()> {
        if let Some(backend) = &self.persistence {
            backend
                .save_run(run)
                .await
                .with_context(|| format!("Failed to persist run {}", run.run_id))?;
        }
        Ok(())
    }
}

/// Bind a phase's input, once per element for fan-out phases
fn resolve_inputs(phase: &Phase, snapshot: &PipelineContext) -> Result<Vec<Value>, RunFailure> {
    let binding_failure = |err: BindingError| {
        RunFailure::new(
            RunErrorKind::InvalidInput,
            format!("cannot bind input of phase '{}': {}", phase.id, err),
        )
        .in_phase(&phase.id)
        .with_field(err.reference())
    };

    let Some(for_each) = &phase.for_each else {
        return Ok(vec![snapshot.resolve(&phase.input).map_err(binding_failure)?]);
    };

    let items = match snapshot
        .resolve(&Value::String(for_each.clone()))
        .map_err(binding_failure)?
    {
        Value::Array(items) => items,
        other => {
            return Err(RunFailure::new(
                RunErrorKind::InvalidInput,
                format!(
                    "for_each '{}' resolved to {}, expected an array",
                    for_each,
                    schema::type_name(&other)
                ),
            )
            .in_phase(&phase.id)
            .with_field(for_each.clone()))
        }
    };

    items
        .iter()
        .map(|item| snapshot.resolve_for_item(&phase.input, item).map_err(binding_failure))
        .collect()
}

fn invocation_failure(phase: &Phase, err: &InvocationError) -> RunFailure {
    let kind = match err {
        InvocationError::InvalidInput { .. } => RunErrorKind::InvalidInput,
        InvocationError::SchemaError { .. } => RunErrorKind::SchemaError,
        InvocationError::Cancelled { .. } => RunErrorKind::Cancelled,
        InvocationError::DelegationFailed { .. }
        | InvocationError::EffectConflict { .. }
        | InvocationError::Storage { .. } => RunErrorKind::DelegationFailed,
    };

    let mut failure = RunFailure::new(kind, err.to_string())
        .in_phase(&phase.id)
        .with_effect(err.effect_id());
    match err {
        InvocationError::EffectConflict { .. } => failure = failure.with_code("EFFECT_CONFLICT"),
        InvocationError::Storage { .. } => failure = failure.with_code("STORAGE_FAILED"),
        _ => {}
    }
    if let Some(field) = err.field() {
        failure = failure.with_field(field);
    }
    failure
}

fn summary_failure(phase_id: &str, err: &BindingError) -> RunFailure {
    RunFailure::new(
        RunErrorKind::SchemaError,
        format!("breakpoint summary cannot be bound: {}", err),
    )
    .with_code(SUMMARY_UNRESOLVED)
    .in_phase(phase_id)
    .with_field(err.reference())
}
