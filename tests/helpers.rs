//! Test utility functions for phaseflow
#![allow(dead_code)]

use phaseflow::agent::{AgentError, AgentExecutor, AgentRequest, AgentResponse};
use phaseflow::core::{
    config::ProcessConfig, PhaseStatus, PipelineRun, Process, RunErrorKind, RunStatus,
};
use phaseflow::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock agent with scripted replies per task.
///
/// Replies for a task are consumed in order; the last one repeats.
#[derive(Default)]
pub struct MockAgent {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, AgentError>>>>,
    requests: Mutex<Vec<AgentRequest>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for a task
    pub fn reply(self, task: &str, output: Value) -> Self {
        self.push(task, Ok(output))
    }

    /// Queue a delegation failure for a task
    pub fn fail(self, task: &str, reason: &str) -> Self {
        self.push(task, Err(AgentError::Api(reason.to_string())))
    }

    /// Delay every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, task: &str, reply: Result<Value, AgentError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(task.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request received, in arrival order
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of delegations received for a task
    pub fn calls(&self, task: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task == task)
            .count()
    }

    /// Highest number of delegations that were running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentExecutor for MockAgent {
    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        self.requests.lock().unwrap().push(request.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(&request.task).ok_or_else(|| {
                AgentError::Internal(format!("MockAgent: no reply scripted for '{}'", request.task))
            })?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        };

        match reply {
            Some(Ok(output)) => Ok(AgentResponse::new(output)),
            Some(Err(err)) => Err(err),
            None => Err(AgentError::Internal("MockAgent: empty script".to_string())),
        }
    }
}

/// Build a process from YAML, panicking on invalid definitions
pub fn process_from_yaml(yaml: &str) -> Process {
    ProcessConfig::from_yaml(yaml)
        .expect("valid process definition")
        .to_process()
        .expect("process builds")
}

/// Error text of a definition that fails to load
pub fn load_error(yaml: &str) -> String {
    match ProcessConfig::from_yaml(yaml).and_then(|c| c.to_process()) {
        Ok(_) => panic!("definition unexpectedly loaded"),
        Err(e) => format!("{:#}", e),
    }
}

/// Sequential engine over a shared mock agent
pub fn engine(agent: &Arc<MockAgent>) -> ExecutionEngine<Arc<MockAgent>> {
    ExecutionEngine::new(agent.clone(), SchedulingStrategy::Sequential)
}

/// Collects engine events for ordering assertions
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl EventLog {
    pub fn attach<A: AgentExecutor>(engine: &ExecutionEngine<A>) -> Self {
        let log = Self::default();
        let sink = log.events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
        log
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Compact labels such as `start:draft`, `done:draft`, `gate:review`
    pub fn labels(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::PhaseStarted { phase_id, .. } => Some(format!("start:{}", phase_id)),
                ExecutionEvent::InvocationResolved { phase_id, .. } => {
                    Some(format!("resolved:{}", phase_id))
                }
                ExecutionEvent::GateEvaluated { phase_id, .. } => Some(format!("gate:{}", phase_id)),
                ExecutionEvent::BreakpointCreated { phase_id, .. } => {
                    Some(format!("breakpoint:{}", phase_id))
                }
                ExecutionEvent::PhaseCompleted { phase_id, .. } => Some(format!("done:{}", phase_id)),
                _ => None,
            })
            .collect()
    }
}

/// Phase ids in execution order
pub fn phase_order(run: &PipelineRun) -> Vec<&str> {
    run.history.iter().map(|r| r.phase_id.as_str()).collect()
}

pub fn assert_completed(run: &PipelineRun) {
    assert_eq!(
        run.status,
        RunStatus::Completed,
        "expected completed run, got {:?} ({:?})",
        run.status,
        run.failure
    );
    assert!(run.failure.is_none());
}

pub fn assert_halted(run: &PipelineRun, kind: RunErrorKind) {
    assert_eq!(run.status, RunStatus::Halted, "expected halted run, got {:?}", run.status);
    let failure = run.failure.as_ref().expect("halted run carries a failure");
    assert_eq!(failure.kind, kind, "unexpected failure: {}", failure);
}

pub fn assert_phase_status(run: &PipelineRun, phase_id: &str, status: PhaseStatus) {
    let record = run
        .records_for(phase_id)
        .last()
        .unwrap_or_else(|| panic!("phase '{}' never ran", phase_id));
    assert_eq!(record.status, status, "phase '{}'", phase_id);
}
