//! Filesystem backup store.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/index.json            metadata index
//! <root>/artifacts/<id>.json   artifact documents
//! ```
//!
//! Files are written to `<name>.tmp` and renamed into place. A new artifact's
//! payload lands before its index entry; a delete drops the index entry before
//! the payload. Readers only see ids present in the index, so neither a
//! half-written nor a half-deleted artifact is ever visible.
//!
//! Mutations run on their own task: a caller that goes away mid-write cannot
//! leave the on-disk index and the in-memory index out of step.

use super::{sort_newest_first, BackupStore};
use crate::model::{is_valid_backup_id, BackupArtifact, BackupMetadata};
use crate::{BackupError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "index.json";
const ARTIFACTS_DIR: &str = "artifacts";
const TMP_SUFFIX: &str = ".tmp";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: Vec<BackupMetadata>,
}

pub struct FsBackupStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    index: RwLock<Vec<BackupMetadata>>,
}

impl FsBackupStore {
    /// Open (or initialize) a store rooted at `root`.
    ///
    /// Leftover temp files and payloads without an index entry are removed:
    /// both can only come from a write that never committed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(ARTIFACTS_DIR)).await?;

        let entries = match tokio::fs::read(root.join(INDEX_FILE)).await {
            Ok(bytes) => {
                let index: IndexFile = serde_json::from_slice(&bytes).map_err(|e| {
                    BackupError::CorruptBackup(format!("backup index is unreadable: {e}"))
                })?;
                index.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let inner = Inner {
            root,
            index: RwLock::new(entries),
        };
        inner.sweep().await?;

        info!(
            root = %inner.root.display(),
            artifacts = inner.index.read().await.len(),
            "Backup store opened"
        );
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

impl Inner {
    fn artifact_path(&self, id: &str) -> PathBuf {
        self.root.join(ARTIFACTS_DIR).join(format!("{id}.json"))
    }

    async fn sweep(&self) -> Result<()> {
        remove_temp_files(&self.root).await?;
        remove_temp_files(&self.root.join(ARTIFACTS_DIR)).await?;

        let known: HashSet<String> = self
            .index
            .read()
            .await
            .iter()
            .map(|m| format!("{}.json", m.backup_id))
            .collect();

        let mut dir = tokio::fs::read_dir(self.root.join(ARTIFACTS_DIR)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !known.contains(&name) {
                warn!(file = %name, "Removing artifact without index entry");
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn persist_index(&self, entries: &[BackupMetadata]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&IndexFile {
            version: INDEX_VERSION,
            entries: entries.to_vec(),
        })?;
        write_atomic(&self.root.join(INDEX_FILE), &bytes).await?;
        Ok(())
    }
}

fn ensure_id(id: &str) -> Result<()> {
    if is_valid_backup_id(id) {
        Ok(())
    } else {
        Err(BackupError::Validation(format!("invalid backup id '{id}'")))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Write `bytes` to `path` via a synced temp file and a rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

async fn remove_temp_files(dir: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().ends_with(TMP_SUFFIX) {
            debug!(path = %entry.path().display(), "Removing stale temp file");
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

impl Inner {
    async fn write_artifact(&self, artifact: &BackupArtifact) -> Result<()> {
        let id = &artifact.metadata.backup_id;
        ensure_id(id)?;

        let mut index = self.index.write().await;
        if index.iter().any(|m| &m.backup_id == id) {
            return Err(BackupError::Validation(format!("backup id '{id}' already exists")));
        }

        let path = self.artifact_path(id);
        write_atomic(&path, &artifact.bytes).await?;

        let mut next = index.clone();
        next.push(artifact.metadata.clone());
        if let Err(e) = self.persist_index(&next).await {
            // Index commit failed: the payload must not outlive it.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        *index = next;

        debug!(backup_id = %id, bytes = artifact.bytes.len(), "Artifact written");
        Ok(())
    }

    async fn delete_artifact(&self, id: &str) -> Result<bool> {
        ensure_id(id)?;
        let mut index = self.index.write().await;
        if !index.iter().any(|m| m.backup_id == id) {
            return Ok(false);
        }

        let next: Vec<BackupMetadata> = index.iter().filter(|m| m.backup_id != id).cloned().collect();
        self.persist_index(&next).await?;
        *index = next;

        match tokio::fs::remove_file(self.artifact_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            // Orphaned payloads are swept on the next open.
            Err(e) => warn!(backup_id = %id, error = %e, "Failed to remove artifact payload"),
        }

        debug!(backup_id = %id, "Artifact deleted");
        Ok(true)
    }
}

fn join_error(e: tokio::task::JoinError) -> BackupError {
    BackupError::StoreIo(std::io::Error::other(e))
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn write(&self, artifact: &BackupArtifact) -> Result<()> {
        let inner = self.inner.clone();
        let artifact = artifact.clone();
        tokio::spawn(async move { inner.write_artifact(&artifact).await })
            .await
            .map_err(join_error)?
    }

    async fn read(&self, id: &str) -> Result<BackupArtifact> {
        ensure_id(id)?;
        let index = self.inner.index.read().await;
        let metadata = index
            .iter()
            .find(|m| m.backup_id == id)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        let bytes = match tokio::fs::read(self.inner.artifact_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::CorruptBackup(format!(
                    "payload file for '{id}' is missing"
                )))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(BackupArtifact { metadata, bytes })
    }

    async fn list(&self) -> Result<Vec<BackupMetadata>> {
        let mut entries = self.inner.index.read().await.clone();
        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let inner = self.inner.clone();
        let id = id.to_string();
        tokio::spawn(async move { inner.delete_artifact(&id).await })
            .await
            .map_err(join_error)?
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.inner.index.read().await.iter().any(|m| m.backup_id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode, MetadataDraft};
    use crate::model::{fixtures, BackupOrigin};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn artifact(id: &str, age_minutes: i64) -> BackupArtifact {
        encode(
            MetadataDraft {
                backup_id: id.to_string(),
                description: format!("backup {id}"),
                created_at: Utc::now() - Duration::minutes(age_minutes),
                origin: BackupOrigin::Manual,
                source_backup_id: None,
                source_file_name: None,
            },
            &fixtures::schedule(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsBackupStore::open(dir.path()).await.unwrap();

        store.write(&artifact("old", 10)).await.unwrap();
        store.write(&artifact("new", 1)).await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|m| m.backup_id).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let read = store.read("old").await.unwrap();
        assert_eq!(read.bytes, artifact_bytes(&store, "old").await);

        assert!(store.delete("old").await.unwrap());
        assert!(!store.delete("old").await.unwrap());
        assert!(!store.exists("old").await.unwrap());
        assert!(matches!(store.read("old").await, Err(BackupError::NotFound(_))));
        assert!(!dir.path().join("artifacts/old.json").exists());
    }

    async fn artifact_bytes(store: &FsBackupStore, id: &str) -> Vec<u8> {
        tokio::fs::read(store.inner.artifact_path(id)).await.unwrap()
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsBackupStore::open(dir.path()).await.unwrap();
            store.write(&artifact("kept", 0)).await.unwrap();
        }
        let store = FsBackupStore::open(dir.path()).await.unwrap();
        assert!(store.exists("kept").await.unwrap());
        assert_eq!(store.read("kept").await.unwrap().metadata.total_records, 3);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsBackupStore::open(dir.path()).await.unwrap();
        store.write(&artifact("dup", 0)).await.unwrap();
        assert!(matches!(
            store.write(&artifact("dup", 0)).await,
            Err(BackupError::Validation(_))
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_sweeps_uncommitted_files() {
        let dir = TempDir::new().unwrap();
        {
            let store = FsBackupStore::open(dir.path()).await.unwrap();
            store.write(&artifact("committed", 0)).await.unwrap();
        }
        let artifacts = dir.path().join(ARTIFACTS_DIR);
        std::fs::write(artifacts.join("half.json.tmp"), b"{").unwrap();
        std::fs::write(artifacts.join("orphan.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("index.json.tmp"), b"{").unwrap();

        let store = FsBackupStore::open(dir.path()).await.unwrap();
        assert!(!artifacts.join("half.json.tmp").exists());
        assert!(!artifacts.join("orphan.json").exists());
        assert!(!dir.path().join("index.json.tmp").exists());
        assert!(store.exists("committed").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_ids() {
        let dir = TempDir::new().unwrap();
        let store = FsBackupStore::open(dir.path()).await.unwrap();
        assert!(matches!(store.read("../index").await, Err(BackupError::Validation(_))));
    }

    #[tokio::test]
    async fn test_abandoned_write_still_commits() {
        let dir = TempDir::new().unwrap();
        let store = FsBackupStore::open(dir.path()).await.unwrap();

        // poll the write once, then drop it
        let _ = tokio::time::timeout(std::time::Duration::ZERO, store.write(&artifact("dropped", 0))).await;

        for _ in 0..200 {
            if store.exists("dropped").await.unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(store.exists("dropped").await.unwrap());

        let reopened = FsBackupStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list().await.unwrap(), store.list().await.unwrap());
        assert_eq!(store.read("dropped").await.unwrap().metadata.total_records, 3);
    }

    #[tokio::test]
    async fn test_concurrent_writes_lose_no_entries() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FsBackupStore::open(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.write(&artifact(&format!("b{i}"), i)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 16);
        let reopened = FsBackupStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 16);
    }
}
