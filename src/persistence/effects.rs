//! Task I/O payload storage keyed by run and address
//!
//! Addresses come from a task's [`IoAddressing`](crate::core::task::IoAddressing)
//! templates and are always relative to the run's directory.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for task payload stores
#[async_trait::async_trait]
pub trait EffectStore: Send + Sync {
    /// Store a payload at a run-relative location
    async fn write(&self, run_id: Uuid, location: &str, payload: &Value) -> Result<()>;

    /// Read a payload back, `None` if nothing was stored
    async fn read(&self, run_id: Uuid, location: &str) -> Result<Option<Value>>;
}

/// Filesystem store: `<root>/runs/<runId>/<location>`
#[derive(Debug, Clone)]
pub struct FsEffectStore {
    root: PathBuf,
}

impl FsEffectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store under the platform data directory
    pub fn with_default_path() -> Self {
        Self::new(crate::default_data_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything a run stored
    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join("runs").join(run_id.to_string())
    }

    fn path_for(&self, run_id: Uuid, location: &str) -> Result<PathBuf> {
        let relative = Path::new(location);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            anyhow::bail!("Location '{}' escapes the run directory", location);
        }
        Ok(self.run_dir(run_id).join(relative))
    }
}

#[async_trait::async_trait]
impl EffectStore for FsEffectStore {
    async fn write(&self, run_id: Uuid, location: &str, payload: &Value) -> Result<()> {
        let path = self.path_for(run_id, location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    async fn read(&self, run_id: Uuid, location: &str) -> Result<Option<Value>> {
        let path = self.path_for(run_id, location)?;
        match tokio::fs::read(&path).await {
            Ok(body) => {
                let value = serde_json::from_slice(&body)
                    .with_context(|| format!("Corrupt payload at {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }
}

/// In-memory store (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct InMemoryEffectStore {
    payloads: RwLock<HashMap<(Uuid, String), Value>>,
}

impl InMemoryEffectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payloads
    pub async fn len(&self) -> usize {
        self.payloads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payloads.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl EffectStore for InMemoryEffectStore {
    async fn write(&self, run_id: Uuid, location: &str, payload: &Value) -> Result<()> {
        self.payloads
            .write()
            .await
            .insert((run_id, location.to_string()), payload.clone());
        Ok(())
    }

    async fn read(&self, run_id: Uuid, location: &str) -> Result<Option<Value>> {
        Ok(self
            .payloads
            .read()
            .await
            .get(&(run_id, location.to_string()))
            .cloned())
    }
}
