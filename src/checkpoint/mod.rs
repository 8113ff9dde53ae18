//! Checkpoint snapshots and the stores that persist them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use crate::error::FlowResult;

/// A serialized snapshot of an execution at a suspension point, sufficient to
/// resume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique id of this checkpoint
    pub checkpoint_id: String,
    /// Identifier of the configuration this snapshot belongs to; opaque to
    /// the core
    pub config_reference: String,
    /// Full context serialization (`data`, `input`, `metadata`)
    pub context: Value,
    /// When the snapshot was created
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a snapshot with a fresh id
    pub fn new<R: Into<String>>(config_reference: R, context: Value) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            config_reference: config_reference.into(),
            context,
            created_at: Utc::now(),
        }
    }
}

/// Key-addressable persistence for checkpoints.
///
/// The store is the only shared mutable resource in a multi-flow deployment
/// and must provide its own concurrency guarantees.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot
    async fn save(&self, checkpoint: &Checkpoint) -> FlowResult<()>;

    /// Load a snapshot by id; `None` when unknown
    async fn load(&self, checkpoint_id: &str) -> FlowResult<Option<Checkpoint>>;

    /// Delete a snapshot; unknown ids are a no-op
    async fn delete(&self, checkpoint_id: &str) -> FlowResult<()>;
}

/// In-process checkpoint store, the default
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> FlowResult<()> {
        self.entries
            .write()
            .insert(checkpoint.checkpoint_id.clone(), checkpoint.clone());
        tracing::debug!(
            checkpoint_id = %checkpoint.checkpoint_id,
            config_reference = %checkpoint.config_reference,
            "saved checkpoint to memory"
        );
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> FlowResult<Option<Checkpoint>> {
        Ok(self.entries.read().get(checkpoint_id).cloned())
    }

    async fn delete(&self, checkpoint_id: &str) -> FlowResult<()> {
        self.entries.write().remove(checkpoint_id);
        Ok(())
    }
}

/// File-backed checkpoint store writing one `<id>.json` per snapshot
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    checkpoint_dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at a directory
    pub fn new<P: AsRef<Path>>(checkpoint_dir: P) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.as_ref().to_path_buf(),
        }
    }

    fn checkpoint_path(&self, checkpoint_id: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{checkpoint_id}.json"))
    }

    async fn ensure_directory(&self) -> FlowResult<()> {
        if !self.checkpoint_dir.exists() {
            fs::create_dir_all(&self.checkpoint_dir).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> FlowResult<()> {
        self.ensure_directory().await?;

        let path = self.checkpoint_path(&checkpoint.checkpoint_id);
        let json_data = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&path, json_data).await?;

        tracing::info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            path = %path.display(),
            "saved checkpoint"
        );
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> FlowResult<Option<Checkpoint>> {
        let path = self.checkpoint_path(checkpoint_id);
        if !path.exists() {
            return Ok(None);
        }

        let json_data = fs::read_to_string(&path).await?;
        let checkpoint: Checkpoint = serde_json::from_str(&json_data)?;

        tracing::info!(
            checkpoint_id = %checkpoint_id,
            path = %path.display(),
            "loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    async fn delete(&self, checkpoint_id: &str) -> FlowResult<()> {
        let path = self.checkpoint_path(checkpoint_id);
        if path.exists() {
            fs::remove_file(&path).await?;
            tracing::info!(
                checkpoint_id = %checkpoint_id,
                path = %path.display(),
                "deleted checkpoint"
            );
        }
        Ok(())
    }
}
