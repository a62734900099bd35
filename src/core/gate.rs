//! Quality gates - threshold checks over a phase's validated output

use crate::core::binding::lookup;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Code reported when a gate halts without declaring its own
pub const DEFAULT_GATE_CODE: &str = "QUALITY_GATE_FAILED";

/// Code reported when the gate metric is absent or not comparable
pub const METRIC_UNAVAILABLE: &str = "METRIC_UNAVAILABLE";

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparison::GreaterOrEqual => ">=",
            Comparison::Greater => ">",
            Comparison::LessOrEqual => "<=",
            Comparison::Less => "<",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        };
        f.write_str(symbol)
    }
}

/// A named metric compared against a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Dotted path into the phase output, e.g. `review.score`
    pub metric: String,
    pub op: Comparison,
    pub target: Value,
}

/// Outcome of comparing a predicate against some metrics
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOutcome {
    Holds,
    Fails { observed: Value },
    Unavailable { reason: String },
}

impl Predicate {
    pub fn check(&self, metrics: &Value) -> PredicateOutcome {
        let Some(observed) = lookup(metrics, &self.metric) else {
            return PredicateOutcome::Unavailable {
                reason: format!("metric '{}' is missing", self.metric),
            };
        };

        let holds = match self.op {
            Comparison::Equal => values_equal(observed, &self.target),
            Comparison::NotEqual => !values_equal(observed, &self.target),
            ordering => {
                let (Some(lhs), Some(rhs)) = (observed.as_f64(), self.target.as_f64()) else {
                    return PredicateOutcome::Unavailable {
                        reason: format!(
                            "metric '{}' = {} cannot be compared with {} {}",
                            self.metric, observed, ordering, self.target
                        ),
                    };
                };
                match ordering {
                    Comparison::GreaterOrEqual => lhs >= rhs,
                    Comparison::Greater => lhs > rhs,
                    Comparison::LessOrEqual => lhs <= rhs,
                    Comparison::Less => lhs < rhs,
                    Comparison::Equal | Comparison::NotEqual => unreachable!(),
                }
            }
        };

        if holds {
            PredicateOutcome::Holds
        } else {
            PredicateOutcome::Fails {
                observed: observed.clone(),
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.op, self.target)
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// What a gate does when its predicate does not hold (or holds, for `on_pass`)
#[derive(Debug, Clone, PartialEq)]
pub enum GateAction {
    Halt,
    Branch(Vec<String>),
}

/// A declared quality gate
#[derive(Debug, Clone, PartialEq)]
pub struct QualityGate {
    pub predicate: Predicate,
    /// Stable error code reported on halt
    pub code: String,
    pub on_fail: GateAction,
    /// Optional alternate plan when the predicate holds
    pub on_pass: Option<Vec<String>>,
}

/// Decision produced by a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Continue {
        reason: String,
    },
    Branch {
        phases: Vec<String>,
        reason: String,
    },
    Halt {
        code: String,
        reason: String,
    },
}

impl GateDecision {
    pub fn reason(&self) -> &str {
        match self {
            GateDecision::Continue { reason }
            | GateDecision::Branch { reason, .. }
            | GateDecision::Halt { reason, .. } => reason,
        }
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, GateDecision::Halt { .. })
    }
}

/// Evaluate a gate against a phase output. Pure: the same gate and metrics
/// always produce the same decision.
pub fn evaluate(gate: &QualityGate, metrics: &Value) -> GateDecision {
    match gate.predicate.check(metrics) {
        PredicateOutcome::Holds => {
            let reason = format!("{} holds", gate.predicate);
            match &gate.on_pass {
                Some(phases) => GateDecision::Branch {
                    phases: phases.clone(),
                    reason,
                },
                None => GateDecision::Continue { reason },
            }
        }
        PredicateOutcome::Fails { observed } => {
            let reason = format!("{} failed (observed {})", gate.predicate, observed);
            match &gate.on_fail {
                GateAction::Halt => GateDecision::Halt {
                    code: gate.code.clone(),
                    reason,
                },
                GateAction::Branch(phases) => GateDecision::Branch {
                    phases: phases.clone(),
                    reason,
                },
            }
        }
        PredicateOutcome::Unavailable { reason } => GateDecision::Halt {
            code: METRIC_UNAVAILABLE.to_string(),
            reason,
        },
    }
}
