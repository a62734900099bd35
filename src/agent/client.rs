//! Agent client configuration

/// Executable used when no command is configured
pub const DEFAULT_AGENT_COMMAND: &str = "phaseflow-agent";

/// Configuration for the subprocess agent
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    /// Worker executable
    ///
    /// If not provided, defaults to `phaseflow-agent` (assumes it's on PATH).
    pub command: Option<String>,

    /// Extra arguments passed before the request is written to stdin
    pub args: Vec<String>,

    /// Hard limit for a single worker process in seconds
    pub timeout_secs: u64,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: 10800,
        }
    }
}

impl AgentClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// The executable to spawn
    pub fn program(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_AGENT_COMMAND)
    }
}
