//! Persistence layer for run snapshots and task payloads

pub mod effects;

#[cfg(feature = "sqlite")]
pub mod store;

pub use effects::{EffectStore, FsEffectStore, InMemoryEffectStore};
#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::RunStatus;
use crate::core::PipelineRun;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    pub process_id: String,

    pub status: RunStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if finished)
    pub finished_at: Option<DateTime<Utc>>,

    /// Number of executed phases
    pub phases_run: usize,

    /// Breakpoint the run is waiting on
    pub pending_breakpoint: Option<Uuid>,

    /// Failure code of a halted run
    pub failure_code: Option<String>,
}

impl RunSummary {
    /// Create a summary from a run
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id,
            process_id: run.process_id.clone(),
            status: run.status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            phases_run: run.history.len(),
            pending_breakpoint: run.pending_breakpoint.as_ref().map(|b| b.id),
            failure_code: run.failure.as_ref().map(|f| f.code.clone()),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run snapshot
    async fn save_run(&self, run: &PipelineRun) -> Result<()>;

    /// Load a run snapshot by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;

    /// List all runs of a process, newest first
    async fn list_runs(&self, process_id: &str) -> Result<Vec<RunSummary>>;

    /// Most recent run of a process
    async fn latest_run(&self, process_id: &str) -> Result<Option<RunSummary>> {
        Ok(self.list_runs(process_id).await?.into_iter().next())
    }

    /// List all process ids with at least one run
    async fn list_processes(&self) -> Result<Vec<String>>;

    async fn delete_run(&self, run_id: Uuid) -> Result<()>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, process_id: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .filter(|run| run.process_id == process_id)
            .map(RunSummary::from_run)
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    async fn list_processes(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut ids: Vec<String> = runs.values().map(|r| r.process_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        self.runs.write().await.remove(&run_id);
        Ok(())
    }
}
