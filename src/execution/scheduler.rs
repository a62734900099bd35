//! Execution scheduler - determines which phases run next and how wide

use crate::core::{binding::Reference, gate::GateAction, Process};
use std::collections::VecDeque;

/// Strategy for scheduling phase execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute phases one at a time, fan-out elements in order
    #[default]
    Sequential,

    /// Execute independent batches and fan-out elements all at once
    Parallel,

    /// Limited parallelism (max N concurrent invocations)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Maximum number of concurrent invocations
    pub fn concurrency(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => usize::MAX,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequential" => Some(SchedulingStrategy::Sequential),
            "parallel" => Some(SchedulingStrategy::Parallel),
            other => other
                .strip_prefix("limited:")
                .and_then(|n| n.parse().ok())
                .map(SchedulingStrategy::LimitedParallel),
        }
    }
}

/// Scheduler for determining which phases to run
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Take the next batch off the front of the plan.
    ///
    /// A batch is the front phase alone, unless it is independent and the
    /// strategy allows concurrency, in which case the following independent
    /// phases join it. Phases keep their plan order.
    pub fn next_batch(&self, process: &Process, plan: &mut VecDeque<String>) -> Vec<String> {
        let Some(first) = plan.pop_front() else {
            return Vec::new();
        };

        let mut batch = vec![first];
        if self.strategy == SchedulingStrategy::Sequential || !batchable(process, &batch[0]) {
            return batch;
        }

        let limit = self.strategy.concurrency();
        while batch.len() < limit {
            let joins = match plan.front() {
                Some(next) => {
                    !batch.contains(next)
                        && batchable(process, next)
                        && !binds_any(process, next, &batch)
                }
                None => false,
            };
            if !joins {
                break;
            }
            if let Some(next) = plan.pop_front() {
                batch.push(next);
            }
        }
        batch
    }
}

/// Independent and unable to suspend or redirect the run
fn batchable(process: &Process, phase_id: &str) -> bool {
    let Some(phase) = process.phase(phase_id) else {
        return false;
    };
    let branches = phase
        .gate
        .as_ref()
        .map(|g| g.on_pass.is_some() || matches!(g.on_fail, GateAction::Branch(_)))
        .unwrap_or(false);
    phase.independent && phase.breakpoint.is_none() && !branches
}

fn binds_any(process: &Process, phase_id: &str, batch: &[String]) -> bool {
    let Some(phase) = process.phase(phase_id) else {
        return true;
    };
    match phase.references() {
        Ok(refs) => refs.iter().any(|r| match r {
            Reference::Phase { phase, .. } => batch.contains(phase),
            _ => false,
        }),
        Err(_) => true,
    }
}
