//! Durable persistence for backup artifacts and their metadata index.
//!
//! Every other component reaches artifact bytes only through [`BackupStore`];
//! nothing outside a store implementation builds artifact paths.

pub mod fs;
pub mod memory;

pub use fs::FsBackupStore;
pub use memory::MemoryBackupStore;

use crate::model::{BackupArtifact, BackupMetadata};
use crate::Result;
use async_trait::async_trait;

/// Write-once artifact storage.
///
/// Implementations must be `Send + Sync` and safe for concurrent access. A
/// reader must never observe a partially written or partially deleted
/// artifact.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Persist a new artifact. Fails with `Validation` if the id is taken.
    async fn write(&self, artifact: &BackupArtifact) -> Result<()>;

    /// Fetch an artifact, or `NotFound`.
    async fn read(&self, id: &str) -> Result<BackupArtifact>;

    /// Metadata of every artifact, newest first. Payloads are not loaded.
    async fn list(&self) -> Result<Vec<BackupMetadata>>;

    /// Remove an artifact and its index entry. Returns `true` if it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn exists(&self, id: &str) -> Result<bool>;
}

/// Newest first; ties broken by id so the order is stable.
pub(crate) fn sort_newest_first(entries: &mut [BackupMetadata]) {
    entries.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.backup_id.cmp(&a.backup_id))
    });
}
