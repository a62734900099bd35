//! Agent request and response types

use crate::core::{schema::Contract, task::EffectId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Error types for agent operations
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("No agent provides capability '{0}'")]
    Unsupported(String),
}

/// Everything a worker needs to perform one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub run_id: Uuid,

    pub effect_id: EffectId,

    /// Task registry key
    pub task: String,

    pub title: String,

    /// Capability the worker must provide
    pub capability: String,

    /// Validated input payload
    pub input: Value,

    /// Contract the result will be checked against
    pub output_contract: Contract,

    /// Where the input payload was stored
    pub input_location: String,

    /// Where the result will be stored
    pub output_location: String,

    /// 1-based delegation attempt
    pub attempt: u32,
}

/// Response from the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The structured result
    pub output: Value,

    /// Token usage information (if available)
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl AgentResponse {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            usage: None,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
