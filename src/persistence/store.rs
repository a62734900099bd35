//! SQLite-based run store

use crate::core::{PipelineRun, RunStatus};
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const SUMMARY_COLUMNS: &str =
    "id, process_id, status, started_at, finished_at, phases_run, pending_breakpoint, failure_code";

/// SQLite run store
///
/// Each row holds summary columns for listing plus the full run snapshot
/// as JSON for resume.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store (`:memory:` for an ephemeral database)
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
            .context("Invalid database path")?
            .create_if_missing(true);

        // Every connection to :memory: is a separate database
        let max_connections = if db_path == ":memory:" { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store under a data directory
    pub async fn in_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        let db_path = data_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Database path is not valid UTF-8"))?;
        Self::new(db_path).await
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        Self::in_dir(&crate::default_data_dir()).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                process_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                phases_run INTEGER NOT NULL DEFAULT 0,
                pending_breakpoint TEXT,
                failure_code TEXT,
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_process_id ON runs(process_id);
            CREATE INDEX IF NOT EXISTS idx_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn summary_from_row(row: &SqliteRow) -> Result<RunSummary> {
        let status: String = row.get("status");
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            process_id: row.get("process_id"),
            status: RunStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("Unknown run status '{}'", status))?,
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            phases_run: row.get::<i64, _>("phases_run") as usize,
            pending_breakpoint: row
                .get::<Option<String>, _>("pending_breakpoint")
                .map(|id| Uuid::parse_str(&id))
                .transpose()?,
            failure_code: row.get("failure_code"),
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        let summary = RunSummary::from_run(run);
        let snapshot = serde_json::to_string(run).context("Failed to serialize run")?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, process_id, status, started_at, finished_at, phases_run, pending_breakpoint, failure_code, snapshot, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
            "#,
        )
        .bind(summary.run_id.to_string())
        .bind(&summary.process_id)
        .bind(summary.status.as_str())
        .bind(Self::to_naive(summary.started_at))
        .bind(summary.finished_at.map(Self::to_naive))
        .bind(summary.phases_run as i64)
        .bind(summary.pending_breakpoint.map(|id| id.to_string()))
        .bind(summary.failure_code)
        .bind(snapshot)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let row = sqlx::query("SELECT snapshot FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        match row {
            Some(row) => {
                let snapshot: String = row.get("snapshot");
                let run = serde_json::from_str(&snapshot)
                    .with_context(|| format!("Corrupt snapshot for run {}", run_id))?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, process_id: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE process_id = ?1 ORDER BY started_at DESC",
            SUMMARY_COLUMNS
        ))
        .bind(process_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn latest_run(&self, process_id: &str) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE process_id = ?1 ORDER BY started_at DESC LIMIT 1",
            SUMMARY_COLUMNS
        ))
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get latest run")?;

        row.as_ref().map(Self::summary_from_row).transpose()
    }

    async fn list_processes(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT process_id
            FROM runs
            ORDER BY process_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list processes")?;

        Ok(rows.iter().map(|row| row.get("process_id")).collect())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete run")?;

        Ok(())
    }
}
