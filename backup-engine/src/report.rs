//! Read-through access to stored snapshots for historical reporting.

use crate::model::{BackupMetadata, MachineProgramRecord};
use crate::store::BackupStore;
use crate::verify::IntegrityVerifier;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// Summary of one stored snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub backup_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub total_records: u32,
    pub machine_count: u32,
    pub backup_size_bytes: u64,
    pub is_valid: bool,
    pub records_per_machine: BTreeMap<i32, u32>,
    pub records_per_status: BTreeMap<String, u32>,
    pub distinct_articles: u32,
    pub distinct_colors: u32,
}

impl BackupStats {
    fn new(metadata: &BackupMetadata, is_valid: bool) -> Self {
        Self {
            backup_id: metadata.backup_id.clone(),
            description: metadata.description.clone(),
            created_at: metadata.created_at,
            total_records: metadata.total_records,
            machine_count: metadata.machine_count,
            backup_size_bytes: metadata.backup_size_bytes,
            is_valid,
            records_per_machine: BTreeMap::new(),
            records_per_status: BTreeMap::new(),
            distinct_articles: 0,
            distinct_colors: 0,
        }
    }

    fn tally(&mut self, records: &[MachineProgramRecord]) {
        let mut articles = BTreeSet::new();
        let mut colors = BTreeSet::new();
        for r in records {
            *self.records_per_machine.entry(r.machine_number).or_default() += 1;
            *self.records_per_status.entry(r.status.to_string()).or_default() += 1;
            articles.insert(r.article_code.as_str());
            colors.extend(r.colors.iter().map(|c| c.trim().to_uppercase()));
        }
        self.distinct_articles = articles.len() as u32;
        self.distinct_colors = colors.len() as u32;
    }
}

#[derive(Clone)]
pub struct ReportDataAdapter {
    store: Arc<dyn BackupStore>,
    verifier: IntegrityVerifier,
}

impl ReportDataAdapter {
    pub fn new(store: Arc<dyn BackupStore>, verifier: IntegrityVerifier) -> Self {
        Self { store, verifier }
    }

    /// The snapshot's records, unmodified, once the artifact verifies.
    pub async fn records_for_report(&self, id: &str) -> Result<Vec<MachineProgramRecord>> {
        if !self.store.exists(id).await? {
            return Err(BackupError::NotFound(id.to_string()));
        }
        match self.verifier.check(id).await {
            Ok((_, records)) => Ok(records),
            Err(BackupError::NotFound(id)) => Err(BackupError::NotFound(id)),
            Err(e) => Err(BackupError::CorruptBackup(e.to_string())),
        }
    }

    /// Breakdown of a snapshot. A corrupt artifact yields `is_valid: false`
    /// with empty breakdowns instead of an error.
    pub async fn stats(&self, id: &str) -> Result<BackupStats> {
        let metadata = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|m| m.backup_id == id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;

        match self.verifier.check(id).await {
            Ok((_, records)) => {
                let mut stats = BackupStats::new(&metadata, true);
                stats.tally(&records);
                Ok(stats)
            }
            Err(e) => {
                warn!(backup_id = %id, error = %e, "Stats requested for a backup that fails verification");
                Ok(BackupStats::new(&metadata, false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{fixtures, ProgramStatus};
    use crate::snapshot::{CreateBackupRequest, SnapshotBuilder};
    use crate::store::MemoryBackupStore;
    use crate::table::MemoryProgramTable;

    async fn setup() -> (ReportDataAdapter, Arc<MemoryBackupStore>, String) {
        let mut rows = fixtures::schedule();
        rows[0].status = ProgramStatus::Running;
        rows[1].colors = vec!["cyan ".to_string(), "BLACK".to_string()];
        let store = Arc::new(MemoryBackupStore::new());
        let table = Arc::new(MemoryProgramTable::new(rows));
        let builder = SnapshotBuilder::new(store.clone(), table, &EngineConfig::default());
        let meta = builder.create(CreateBackupRequest::manual(None)).await.unwrap();
        let adapter = ReportDataAdapter::new(store.clone(), IntegrityVerifier::new(store.clone()));
        (adapter, store, meta.backup_id)
    }

    #[tokio::test]
    async fn test_records_pass_through_unmodified() {
        let (adapter, _, id) = setup().await;
        let records = adapter.records_for_report(&id).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, ProgramStatus::Running);
    }

    #[tokio::test]
    async fn test_stats_breakdown() {
        let (adapter, _, id) = setup().await;
        let stats = adapter.stats(&id).await.unwrap();
        assert!(stats.is_valid);
        assert_eq!(stats.records_per_machine.get(&11), Some(&1));
        assert_eq!(stats.records_per_machine.get(&12), Some(&2));
        assert_eq!(stats.records_per_status.get("READY"), Some(&2));
        assert_eq!(stats.records_per_status.get("RUNNING"), Some(&1));
        assert_eq!(stats.distinct_articles, 3);
        // CYAN, MAGENTA, PANTONE 485, BLACK
        assert_eq!(stats.distinct_colors, 4);
    }

    #[tokio::test]
    async fn test_corrupt_backup() {
        let (adapter, store, id) = setup().await;
        store.tamper(&id, |b| b.truncate(b.len() - 3)).await.unwrap();

        assert!(matches!(
            adapter.records_for_report(&id).await,
            Err(BackupError::CorruptBackup(_))
        ));
        let stats = adapter.stats(&id).await.unwrap();
        assert!(!stats.is_valid);
        assert!(stats.records_per_machine.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_backup() {
        let (adapter, _, _) = setup().await;
        assert!(matches!(adapter.records_for_report("nope").await, Err(BackupError::NotFound(_))));
        assert!(matches!(adapter.stats("nope").await, Err(BackupError::NotFound(_))));
    }
}
