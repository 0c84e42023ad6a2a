//! Service facade: the single entry point used by the HTTP layer and the
//! scheduler.
//!
//! Create, daily and import report through [`BackupResult`]; every other
//! operation returns a typed error so callers can tell `NotFound` from
//! corruption from I/O failure.

use crate::config::EngineConfig;
use crate::model::{BackupMetadata, BackupResult, MachineProgramRecord};
use crate::report::{BackupStats, ReportDataAdapter};
use crate::restore::{RestoreEngine, RestorePhase, RestoreReport};
use crate::schedule::{DailyBackupTrigger, TriggerOutcome};
use crate::snapshot::{CreateBackupRequest, SnapshotBuilder};
use crate::store::BackupStore;
use crate::table::ProgramTable;
use crate::transfer::{ArtifactTransfer, ExportFormat, ExportedFile};
use crate::verify::IntegrityVerifier;
use crate::{BackupError, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct BackupService {
    store: Arc<dyn BackupStore>,
    snapshots: Arc<SnapshotBuilder>,
    verifier: IntegrityVerifier,
    restorer: RestoreEngine,
    transfer: ArtifactTransfer,
    reports: ReportDataAdapter,
    daily: DailyBackupTrigger,
}

impl BackupService {
    pub fn new(store: Arc<dyn BackupStore>, table: Arc<dyn ProgramTable>, config: EngineConfig) -> Self {
        let snapshots = Arc::new(SnapshotBuilder::new(store.clone(), table.clone(), &config));
        let verifier = IntegrityVerifier::new(store.clone());
        Self {
            restorer: RestoreEngine::new(store.clone(), table, snapshots.clone(), verifier.clone()),
            transfer: ArtifactTransfer::new(store.clone()).with_max_document_bytes(config.max_import_bytes),
            reports: ReportDataAdapter::new(store.clone(), verifier.clone()),
            daily: DailyBackupTrigger::new(store.clone(), snapshots.clone(), config.max_daily_backups),
            store,
            snapshots,
            verifier,
        }
    }

    pub async fn create_backup(&self, request: CreateBackupRequest) -> BackupResult {
        match self.snapshots.create(request).await {
            Ok(meta) => {
                let message = format!("Backup created with {} records", meta.total_records);
                BackupResult::ok(meta, message)
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Backup creation failed");
                BackupResult::failed(&e)
            }
        }
    }

    pub async fn create_daily_backup(&self) -> BackupResult {
        match self.snapshots.create_daily().await {
            Ok(meta) => BackupResult::ok(meta, "Daily backup created"),
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Daily backup failed");
                BackupResult::failed(&e)
            }
        }
    }

    /// Scheduled entry point: one daily artifact per day plus retention.
    pub async fn run_daily_trigger(&self) -> Result<TriggerOutcome> {
        self.daily.fire().await
    }

    /// All artifacts, newest first, each with a freshly computed `is_valid`.
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        let mut entries = self.store.list().await?;
        for entry in &mut entries {
            entry.is_valid = self.verifier.verify(&entry.backup_id).await;
        }
        Ok(entries)
    }

    pub async fn restore_backup(
        &self,
        id: &str,
        create_safety_backup_first: bool,
        cancel: &CancellationToken,
    ) -> Result<RestoreReport> {
        self.restorer.restore(id, create_safety_backup_first, cancel).await
    }

    pub fn restore_phase(&self) -> watch::Receiver<RestorePhase> {
        self.restorer.subscribe()
    }

    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        if self.store.delete(id).await? {
            info!(backup_id = %id, "Backup deleted");
            Ok(())
        } else {
            Err(BackupError::NotFound(id.to_string()))
        }
    }

    pub async fn verify_backup(&self, id: &str) -> bool {
        self.verifier.verify(id).await
    }

    pub async fn get_backup_data(&self, id: &str) -> Result<Vec<MachineProgramRecord>> {
        self.reports.records_for_report(id).await
    }

    pub async fn get_backup_stats(&self, id: &str) -> Result<BackupStats> {
        self.reports.stats(id).await
    }

    pub async fn export_backup(
        &self,
        id: &str,
        format: ExportFormat,
        cancel: &CancellationToken,
    ) -> Result<ExportedFile> {
        self.transfer.export(id, format, cancel).await
    }

    pub async fn import_backup(
        &self,
        bytes: Vec<u8>,
        original_file_name: &str,
        cancel: &CancellationToken,
    ) -> BackupResult {
        match self.transfer.import(bytes, original_file_name, cancel).await {
            Ok(meta) => {
                let message = format!("Imported {} as {}", original_file_name, meta.backup_id);
                BackupResult::ok(meta, message)
            }
            Err(e) => BackupResult::failed(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;
    use crate::store::MemoryBackupStore;
    use crate::table::MemoryProgramTable;

    fn service() -> (BackupService, Arc<MemoryBackupStore>, Arc<MemoryProgramTable>) {
        let store = Arc::new(MemoryBackupStore::new());
        let table = Arc::new(MemoryProgramTable::new(fixtures::schedule()));
        (
            BackupService::new(store.clone(), table.clone(), EngineConfig::default()),
            store,
            table,
        )
    }

    #[tokio::test]
    async fn test_create_delete_restore_export_import_scenario() {
        let (service, _, table) = service();
        let cancel = CancellationToken::new();

        let created = service.create_backup(CreateBackupRequest::manual(None)).await;
        assert!(created.success, "{}", created.message);
        let meta = created.metadata.unwrap();
        assert_eq!((meta.total_records, meta.machine_count), (3, 2));

        table.remove_order("F1").await;
        service.restore_backup(&meta.backup_id, true, &cancel).await.unwrap();
        let mut orders: Vec<_> = table.rows().await.into_iter().map(|r| r.order_number).collect();
        orders.sort();
        assert_eq!(orders, vec!["F1", "F2", "F3"]);

        let file = service
            .export_backup(&meta.backup_id, ExportFormat::Json, &cancel)
            .await
            .unwrap();
        let imported = service.import_backup(file.bytes, &file.file_name, &cancel).await;
        assert!(imported.success);
        let imported = imported.metadata.unwrap();
        assert_ne!(imported.backup_id, meta.backup_id);
        assert_eq!((imported.total_records, imported.machine_count), (3, 2));

        assert!(service.verify_backup(&meta.backup_id).await);
        assert!(service.verify_backup(&imported.backup_id).await);
    }

    #[tokio::test]
    async fn test_list_marks_corrupt_entries_without_failing() {
        let (service, store, _) = service();
        let good = service.create_backup(CreateBackupRequest::manual(None)).await.backup_id.unwrap();
        let bad = service.create_backup(CreateBackupRequest::manual(None)).await.backup_id.unwrap();
        store.tamper(&bad, |b| b.truncate(10)).await.unwrap();

        let list = service.list_backups().await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().find(|m| m.backup_id == good).unwrap().is_valid);
        assert!(!list.iter().find(|m| m.backup_id == bad).unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_tampered_import_does_not_appear_in_list() {
        let (service, store, _) = service();
        let id = service.create_backup(CreateBackupRequest::manual(None)).await.backup_id.unwrap();
        let bytes = store.read(&id).await.unwrap().bytes;
        let mut doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        doc["checksum"] = serde_json::json!("deadbeef");

        let result = service
            .import_backup(serde_json::to_vec(&doc).unwrap(), "x.json", &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("CorruptBackup"));
        assert_eq!(service.list_backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let (service, _, _) = service();
        assert!(matches!(
            service.delete_backup("backup_x").await,
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_snapshot_failure_is_reported_not_raised() {
        let store = Arc::new(MemoryBackupStore::new());
        let table = Arc::new(MemoryProgramTable::new(vec![]));
        let config = EngineConfig {
            require_non_empty: true,
            ..EngineConfig::default()
        };
        let service = BackupService::new(store, table, config);
        let result = service.create_daily_backup().await;
        assert!(!result.success);
        assert_eq!(result.error_kind.as_deref(), Some("EmptySnapshot"));
    }
}
