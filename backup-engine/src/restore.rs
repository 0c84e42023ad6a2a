//! Restore engine: replaces the live table with a verified snapshot.
//!
//! Restores are serialized on a lock scoped to the live table. Within one
//! call the order is fixed: optional safety backup, verification, then a
//! single transactional replace.

use crate::model::MachineProgramRecord;
use crate::snapshot::{CreateBackupRequest, SnapshotBuilder};
use crate::store::BackupStore;
use crate::table::ProgramTable;
use crate::verify::IntegrityVerifier;
use crate::{BackupError, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Observable progress of the restore engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestorePhase {
    Idle,
    SafetyBackup,
    Verifying,
    Restoring,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub backup_id: String,
    pub records_restored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_backup_id: Option<String>,
}

pub struct RestoreEngine {
    store: Arc<dyn BackupStore>,
    table: Arc<dyn ProgramTable>,
    snapshots: Arc<SnapshotBuilder>,
    verifier: IntegrityVerifier,
    table_lock: Mutex<()>,
    phase: watch::Sender<RestorePhase>,
}

impl RestoreEngine {
    pub fn new(
        store: Arc<dyn BackupStore>,
        table: Arc<dyn ProgramTable>,
        snapshots: Arc<SnapshotBuilder>,
        verifier: IntegrityVerifier,
    ) -> Self {
        let (phase, _) = watch::channel(RestorePhase::Idle);
        Self {
            store,
            table,
            snapshots,
            verifier,
            table_lock: Mutex::new(()),
            phase,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RestorePhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RestorePhase {
        *self.phase.borrow()
    }

    pub async fn restore(
        &self,
        id: &str,
        create_safety_backup_first: bool,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport> {
        let _guard = self.table_lock.lock().await;
        let result = self.run(id, create_safety_backup_first, cancel).await;
        self.phase.send_replace(RestorePhase::Idle);
        result
    }

    async fn run(
        &self,
        id: &str,
        create_safety_backup_first: bool,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport> {
        if !self.store.exists(id).await? {
            return Err(BackupError::NotFound(id.to_string()));
        }
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let safety_backup_id = if create_safety_backup_first {
            self.phase.send_replace(RestorePhase::SafetyBackup);
            let meta = self
                .snapshots
                .create(CreateBackupRequest::safety(id))
                .await
                .map_err(|e| {
                    warn!(backup_id = %id, error = %e, "Safety backup failed, restore aborted");
                    BackupError::SafetyBackupFailed(e.to_string())
                })?;
            Some(meta.backup_id)
        } else {
            None
        };

        self.phase.send_replace(RestorePhase::Verifying);
        let records = match self.verifier.check(id).await {
            Ok((_, records)) => records,
            Err(e) => {
                self.phase.send_replace(RestorePhase::Rejected);
                warn!(backup_id = %id, kind = e.kind(), error = %e, "Restore rejected");
                return Err(match e {
                    BackupError::NotFound(id) => BackupError::NotFound(id),
                    other => BackupError::CorruptBackup(other.to_string()),
                });
            }
        };

        if cancel.is_cancelled() {
            info!(backup_id = %id, "Restore cancelled before replacing the live table");
            return Err(BackupError::Cancelled);
        }

        self.phase.send_replace(RestorePhase::Restoring);
        self.replace(id, &records).await?;

        info!(
            backup_id = %id,
            records = records.len(),
            safety_backup_id = ?safety_backup_id,
            "Restore completed"
        );
        Ok(RestoreReport {
            backup_id: id.to_string(),
            records_restored: records.len(),
            safety_backup_id,
        })
    }

    async fn replace(&self, id: &str, records: &[MachineProgramRecord]) -> Result<()> {
        self.table.replace_all(records).await.map_err(|e| {
            warn!(backup_id = %id, error = %e, "Live table replace failed and was rolled back");
            e
        })
    }
}
