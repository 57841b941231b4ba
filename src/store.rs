//! Run-state records and the stores that keep them.

use crate::status::{StepStatus, WorkflowStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::info;

/// Errors raised by a [`RunStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No record for run: {0}")]
    NotFound(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Per-step line of a [`RunRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Durable audit record written once at the end of every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Context data with every value rendered as a string.
    pub data: BTreeMap<String, String>,
    /// In execution order.
    pub step_results: IndexMap<String, StepRecord>,
    pub errors: Vec<String>,
}

/// Key-addressable storage for [`RunRecord`]s.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Writes the record under its `workflow_id`, replacing any previous one.
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError>;

    async fn load(&self, workflow_id: &str) -> Result<RunRecord, StoreError>;
}

/// Stores each record as `<dir>/<workflow_id>.json`.
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl Default for FileRunStore {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("workflows"))
    }
}

impl FileRunStore {
    /// Creates a store writing into `dir`, created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record of `workflow_id`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are replaced with `_`, so every
    /// record lands directly inside [`dir`](Self::dir) whatever the workflow
    /// name contains.
    pub fn record_path(&self, workflow_id: &str) -> PathBuf {
        let file_stem: String = workflow_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_stem))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(&record.workflow_id);
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&path, json).await?;

        info!("State saved to {}", path.display());
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<RunRecord, StoreError> {
        let path = self.record_path(workflow_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(workflow_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }
}

/// Keeps records in memory. Useful in tests and for short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    records: RwLock<HashMap<String, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.insert(record.workflow_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<RunRecord, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        records
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))
    }
}
