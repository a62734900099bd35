//! Subprocess worker client - one process per delegation
//!
//! The request is written to the worker's stdin as JSON; the worker prints
//! its result to stdout. Output goes through [`repair`](crate::agent::repair)
//! before it is parsed.

use crate::agent::{repair, AgentClientConfig, AgentError, AgentRequest};
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Client for executing a worker command as a subprocess
#[derive(Debug, Clone)]
pub struct SubprocessClient {
    /// Worker executable
    program: String,

    args: Vec<String>,

    /// Timeout for command execution in seconds
    timeout_secs: u64,
}

impl SubprocessClient {
    pub fn new(config: &AgentClientConfig) -> Self {
        Self {
            program: config.program().to_string(),
            args: config.args.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    /// Get the worker executable path
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run the worker for one request
    ///
    /// # Errors
    /// Returns `AgentError` if:
    /// - The executable cannot be spawned
    /// - The worker exits with a non-zero status
    /// - No JSON document can be recovered from stdout
    /// - The command times out
    pub async fn execute(&self, request: &AgentRequest) -> Result<Value, AgentError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| AgentError::Internal(format!("Failed to encode request: {}", e)))?;

        debug!(
            effect_id = %request.effect_id,
            task = %request.task,
            "Spawning worker {} ({} byte request)",
            self.program,
            payload.len()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("PHASEFLOW_RUN_ID", request.run_id.to_string())
            .env("PHASEFLOW_EFFECT_ID", request.effect_id.to_string())
            .env("PHASEFLOW_CAPABILITY", &request.capability)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Internal(format!("Failed to spawn {}: {}", self.program, e)))?;

        // stdin is fed concurrently with draining stdout
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!("Worker closed stdin early: {}", e);
                }
            });
        }

        let output = timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| AgentError::Timeout(self.timeout_secs))?
            .map_err(|e| AgentError::Internal(format!("Failed to wait for worker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            warn!("Worker exited with code {}: {}", exit_code, stderr.trim());
            return Err(AgentError::Api(format!(
                "worker exited with code {}: {}",
                exit_code,
                stderr.trim()
            )));
        }

        debug!("Worker returned {} bytes of output", output.stdout.len());

        repair::parse_output(&output.stdout).map_err(AgentError::InvalidOutput)
    }
}
