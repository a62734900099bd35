//! Agent boundary - the external workers that perform delegated tasks

pub mod client;
pub mod repair;
pub mod response;
pub mod subprocess_client;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use client::AgentClientConfig;
pub use response::{AgentError, AgentRequest, AgentResponse, TokenUsage};
pub use subprocess_client::SubprocessClient;

/// Trait for agent execution - allows for different implementations
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Perform one delegated task and return its structured result
    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError>;

    /// Whether this executor can serve a capability
    fn supports(&self, _capability: &str) -> bool {
        true
    }
}

#[async_trait]
impl<T: AgentExecutor + ?Sized> AgentExecutor for Arc<T> {
    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        (**self).execute(request).await
    }

    fn supports(&self, capability: &str) -> bool {
        (**self).supports(capability)
    }
}

/// Agent that runs a worker command as a subprocess per delegation
#[derive(Debug, Clone)]
pub struct SubprocessAgent {
    /// The subprocess client that handles the actual worker execution
    client: SubprocessClient,
}

impl SubprocessAgent {
    /// Create a new subprocess agent
    ///
    /// The `config.command` field is used as the worker executable.
    /// If not provided, defaults to `phaseflow-agent` (assuming it's on PATH).
    pub fn new(config: AgentClientConfig) -> Self {
        Self {
            client: SubprocessClient::new(&config),
        }
    }
}

#[async_trait]
impl AgentExecutor for SubprocessAgent {
    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let output = self.client.execute(request).await?;
        Ok(AgentResponse::new(output))
    }
}

/// Routes each request to the executor registered for its capability
#[derive(Default, Clone)]
pub struct AgentRouter {
    routes: HashMap<String, Arc<dyn AgentExecutor>>,
    fallback: Option<Arc<dyn AgentExecutor>>,
}

impl AgentRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for one capability
    pub fn route(mut self, capability: impl Into<String>, executor: Arc<dyn AgentExecutor>) -> Self {
        self.routes.insert(capability.into(), executor);
        self
    }

    /// Executor used for capabilities without a dedicated route
    pub fn fallback(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    fn select(&self, capability: &str) -> Option<&Arc<dyn AgentExecutor>> {
        self.routes
            .get(capability)
            .or_else(|| self.fallback.as_ref().filter(|f| f.supports(capability)))
    }
}

impl std::fmt::Debug for AgentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut capabilities: Vec<&String> = self.routes.keys().collect();
        capabilities.sort();
        f.debug_struct("AgentRouter")
            .field("routes", &capabilities)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl AgentExecutor for AgentRouter {
    async fn execute(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        match self.select(&request.capability) {
            Some(executor) => executor.execute(request).await,
            None => Err(AgentError::Unsupported(request.capability.clone())),
        }
    }

    fn supports(&self, capability: &str) -> bool {
        self.select(capability).is_some()
    }
}
