//! Task invoker - runs one task invocation against the agent
//!
//! Every invocation is identified by an [`EffectId`]. The invoker keeps at
//! most one delegation in flight per effect, replays succeeded effects
//! instead of delegating again, and never returns an output that has not
//! passed the task's output contract.

use crate::{
    agent::{AgentExecutor, AgentRequest},
    core::{
        schema::{self, SchemaError},
        step::RetryPolicy,
        task::{EffectId, Invocation, InvocationStatus, TaskDefinition},
    },
    persistence::EffectStore,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Errors raised by an invocation
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("input for task '{task}' violates its contract at {source}")]
    InvalidInput {
        task: String,
        effect_id: EffectId,
        source: SchemaError,
    },

    #[error("output of task '{task}' violates its contract at {source}")]
    SchemaError {
        task: String,
        effect_id: EffectId,
        source: SchemaError,
    },

    #[error("delegation of task '{task}' failed after {attempts} attempt(s): {reason}")]
    DelegationFailed {
        task: String,
        effect_id: EffectId,
        attempts: u32,
        reason: String,
    },

    #[error("effect {effect_id} was already invoked with a different input")]
    EffectConflict { effect_id: EffectId },

    #[error("invocation {effect_id} was cancelled")]
    Cancelled { effect_id: EffectId },

    #[error("storage failed for effect {effect_id}: {reason}")]
    Storage { effect_id: EffectId, reason: String },
}

impl InvocationError {
    pub fn effect_id(&self) -> EffectId {
        match self {
            InvocationError::InvalidInput { effect_id, .. }
            | InvocationError::SchemaError { effect_id, .. }
            | InvocationError::DelegationFailed { effect_id, .. }
            | InvocationError::EffectConflict { effect_id }
            | InvocationError::Cancelled { effect_id }
            | InvocationError::Storage { effect_id, .. } => *effect_id,
        }
    }

    /// Offending payload path, when the error is a contract violation
    pub fn field(&self) -> Option<&str> {
        match self {
            InvocationError::InvalidInput { source, .. }
            | InvocationError::SchemaError { source, .. } => Some(&source.path),
            _ => None,
        }
    }
}

/// Where an invocation sits in its run
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub run_id: Uuid,

    /// Position of the phase in the run's execution sequence
    pub phase_index: usize,

    /// Distinguishes invocations within one phase (fan-out element index)
    pub disambiguator: usize,

    pub input: Value,

    pub retry: RetryPolicy,

    pub timeout: Duration,
}

impl InvocationRequest {
    pub fn effect_id(&self, task: &str) -> EffectId {
        EffectId::derive(self.run_id, self.phase_index, task, self.disambiguator)
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<Invocation>>>;

/// Executes task invocations
pub struct TaskInvoker<A> {
    agent: A,
    store: Arc<dyn EffectStore>,
    /// Invocations of runs still in progress, tagged with their run
    ledger: Mutex<HashMap<EffectId, (Uuid, Slot)>>,
    delegations: AtomicUsize,
}

impl<A: AgentExecutor> TaskInvoker<A> {
    pub fn new(agent: A, store: Arc<dyn EffectStore>) -> Self {
        Self {
            agent,
            store,
            ledger: Mutex::new(HashMap::new()),
            delegations: AtomicUsize::new(0),
        }
    }

    /// Number of delegations sent to the agent so far
    pub fn delegations(&self) -> usize {
        self.delegations.load(Ordering::SeqCst)
    }

    /// Number of effects held in memory
    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop the in-memory records of a finished run; the effect store still
    /// replays them. Returns how many were dropped.
    pub fn forget_run(&self, run_id: Uuid) -> usize {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let before = ledger.len();
        ledger.retain(|_, (run, _)| *run != run_id);
        before - ledger.len()
    }

    /// Snapshot of an effect's invocation record
    pub async fn invocation(&self, effect_id: EffectId) -> Option<Invocation> {
        let slot = self.existing_slot(effect_id)?;
        let record = slot.lock().await;
        record.clone()
    }

    fn existing_slot(&self, effect_id: EffectId) -> Option<Slot> {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.get(&effect_id).map(|(_, slot)| slot.clone())
    }

    fn slot(&self, run_id: Uuid, effect_id: EffectId) -> Slot {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger
            .entry(effect_id)
            .or_insert_with(|| (run_id, Slot::default()))
            .1
            .clone()
    }

    /// Invoke a task and return its succeeded invocation
    pub async fn invoke(
        &self,
        definition: &TaskDefinition,
        request: InvocationRequest,
        cancel: &CancellationToken,
    ) -> Result<Invocation, InvocationError> {
        let effect_id = request.effect_id(&definition.name);

        schema::validate(&definition.input_contract, &request.input).map_err(|source| {
            warn!(%effect_id, task = %definition.name, "Rejected input: {}", source);
            InvocationError::InvalidInput {
                task: definition.name.clone(),
                effect_id,
                source,
            }
        })?;

        // Held for the whole invocation: at most one delegation per effect
        let slot = self.slot(request.run_id, effect_id);
        let mut record = slot.lock().await;

        if let Some(existing) = record.as_ref() {
            if existing.input != request.input {
                return Err(InvocationError::EffectConflict { effect_id });
            }
            if existing.status == InvocationStatus::Succeeded {
                debug!(%effect_id, "Replaying succeeded invocation from ledger");
                return Ok(existing.clone());
            }
        } else if let Some(replayed) = self.replay_from_store(definition, &request, effect_id).await? {
            *record = Some(replayed.clone());
            return Ok(replayed);
        }

        let input_location = definition.io.input_location(effect_id);
        let output_location = definition.io.output_location(effect_id);

        self.store
            .write(request.run_id, &input_location, &request.input)
            .await
            .map_err(|e| InvocationError::Storage {
                effect_id,
                reason: e.to_string(),
            })?;

        let mut invocation = Invocation::pending(
            effect_id,
            &definition.name,
            request.phase_index,
            request.input.clone(),
        );
        let max_attempts = request.retry.max_attempts.max(1);

        loop {
            if cancel.is_cancelled() {
                invocation.cancel();
                *record = Some(invocation);
                return Err(InvocationError::Cancelled { effect_id });
            }

            invocation.attempts += 1;
            let attempt = invocation.attempts;
            let agent_request = AgentRequest {
                run_id: request.run_id,
                effect_id,
                task: definition.name.clone(),
                title: definition.title.clone(),
                capability: definition.capability.clone(),
                input: request.input.clone(),
                output_contract: definition.output_contract.clone(),
                input_location: input_location.clone(),
                output_location: output_location.clone(),
                attempt,
            };

            info!(%effect_id, task = %definition.name, attempt, "Delegating task");
            self.delegations.fetch_add(1, Ordering::SeqCst);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(%effect_id, "Invocation cancelled in flight");
                    invocation.cancel();
                    *record = Some(invocation);
                    return Err(InvocationError::Cancelled { effect_id });
                }
                outcome = tokio::time::timeout(request.timeout, self.agent.execute(&agent_request)) => outcome,
            };

            let reason = match outcome {
                Ok(Ok(response)) => {
                    if let Err(source) = schema::validate(&definition.output_contract, &response.output) {
                        error!(%effect_id, task = %definition.name, "Output violates contract: {}", source);
                        invocation.fail(source.to_string());
                        *record = Some(invocation);
                        return Err(InvocationError::SchemaError {
                            task: definition.name.clone(),
                            effect_id,
                            source,
                        });
                    }

                    self.store
                        .write(request.run_id, &output_location, &response.output)
                        .await
                        .map_err(|e| InvocationError::Storage {
                            effect_id,
                            reason: e.to_string(),
                        })?;

                    invocation.succeed(response.output);
                    *record = Some(invocation.clone());
                    debug!(%effect_id, "Invocation succeeded");
                    return Ok(invocation);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", request.timeout),
            };

            warn!(%effect_id, task = %definition.name, attempt, "Delegation failed: {}", reason);

            if attempt >= max_attempts {
                invocation.fail(reason.clone());
                *record = Some(invocation);
                return Err(InvocationError::DelegationFailed {
                    task: definition.name.clone(),
                    effect_id,
                    attempts: attempt,
                    reason,
                });
            }

            let delay = request.retry.delay_after(attempt);
            if !delay.is_zero() {
                debug!(%effect_id, "Retrying in {:?}", delay);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Recover a succeeded effect persisted by an earlier process
    async fn replay_from_store(
        &self,
        definition: &TaskDefinition,
        request: &InvocationRequest,
        effect_id: EffectId,
    ) -> Result<Option<Invocation>, InvocationError> {
        let storage = |e: anyhow::Error| InvocationError::Storage {
            effect_id,
            reason: e.to_string(),
        };

        let input_location = definition.io.input_location(effect_id);
        let Some(stored_input) = self
            .store
            .read(request.run_id, &input_location)
            .await
            .map_err(storage)?
        else {
            return Ok(None);
        };
        if stored_input != request.input {
            return Err(InvocationError::EffectConflict { effect_id });
        }

        let output_location = definition.io.output_location(effect_id);
        let Some(output) = self
            .store
            .read(request.run_id, &output_location)
            .await
            .map_err(storage)?
        else {
            return Ok(None);
        };

        // A stored result is only trusted if it still satisfies the contract
        if schema::validate(&definition.output_contract, &output).is_err() {
            warn!(%effect_id, "Ignoring stored result that violates the output contract");
            return Ok(None);
        }

        debug!(%effect_id, "Replaying succeeded invocation from effect store");
        let mut invocation = Invocation::pending(
            effect_id,
            &definition.name,
            request.phase_index,
            request.input.clone(),
        );
        invocation.succeed(output);
        Ok(Some(invocation))
    }
}
