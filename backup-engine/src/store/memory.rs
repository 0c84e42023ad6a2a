//! In-memory backup store.

use super::{sort_newest_first, BackupStore};
use crate::model::{BackupArtifact, BackupMetadata};
use crate::{BackupError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store with the same contract as the filesystem store.
#[derive(Default)]
pub struct MemoryBackupStore {
    artifacts: RwLock<HashMap<String, BackupArtifact>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored bytes of an artifact in place.
    ///
    /// Artifacts are write-once; this exists so callers can simulate on-disk
    /// corruption.
    pub async fn tamper(&self, id: &str, f: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let mut artifacts = self.artifacts.write().await;
        let artifact = artifacts
            .get_mut(id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;
        f(&mut artifact.bytes);
        Ok(())
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn write(&self, artifact: &BackupArtifact) -> Result<()> {
        let mut artifacts = self.artifacts.write().await;
        let id = &artifact.metadata.backup_id;
        if artifacts.contains_key(id) {
            return Err(BackupError::Validation(format!("backup id '{id}' already exists")));
        }
        artifacts.insert(id.clone(), artifact.clone());
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<BackupArtifact> {
        self.artifacts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<BackupMetadata>> {
        let mut entries: Vec<BackupMetadata> = self
            .artifacts
            .read()
            .await
            .values()
            .map(|a| a.metadata.clone())
            .collect();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.artifacts.write().await.remove(id).is_some())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.artifacts.read().await.contains_key(id))
    }
}
