//! Daily backup trigger.
//!
//! Whatever drives it (a cron job, a manual call), the trigger goes through
//! the same snapshot entry point as the API. It owns the one-per-day policy
//! and the retention of daily artifacts.

use crate::model::{BackupMetadata, BackupOrigin};
use crate::snapshot::{daily_description, SnapshotBuilder};
use crate::store::BackupStore;
use crate::Result;
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Created(BackupMetadata),
    /// Today's daily artifact already exists.
    Skipped { existing_id: String },
}

pub struct DailyBackupTrigger {
    store: Arc<dyn BackupStore>,
    snapshots: Arc<SnapshotBuilder>,
    max_daily_backups: usize,
}

impl DailyBackupTrigger {
    pub fn new(store: Arc<dyn BackupStore>, snapshots: Arc<SnapshotBuilder>, max_daily_backups: usize) -> Self {
        Self {
            store,
            snapshots,
            max_daily_backups,
        }
    }

    pub async fn fire(&self) -> Result<TriggerOutcome> {
        self.fire_on(Local::now().date_naive()).await
    }

    pub async fn fire_on(&self, date: NaiveDate) -> Result<TriggerOutcome> {
        let description = daily_description(date);
        let existing = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|m| m.origin == BackupOrigin::Daily && m.description == description);

        let outcome = match existing {
            Some(m) => {
                info!(backup_id = %m.backup_id, "Daily backup already exists, skipping");
                TriggerOutcome::Skipped { existing_id: m.backup_id }
            }
            None => TriggerOutcome::Created(self.snapshots.create_daily_for(date).await?),
        };

        if let Err(e) = self.prune().await {
            warn!(error = %e, "Failed to prune old daily backups");
        }
        Ok(outcome)
    }

    /// Delete daily artifacts beyond the newest `max_daily_backups`. Other
    /// origins are never touched.
    async fn prune(&self) -> Result<usize> {
        if self.max_daily_backups == 0 {
            return Ok(0);
        }

        let stale: Vec<BackupMetadata> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|m| m.origin == BackupOrigin::Daily)
            .skip(self.max_daily_backups)
            .collect();

        let mut removed = 0;
        for m in stale {
            if self.store.delete(&m.backup_id).await? {
                info!(backup_id = %m.backup_id, "Removed old daily backup");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::fixtures;
    use crate::snapshot::CreateBackupRequest;
    use crate::store::MemoryBackupStore;
    use crate::table::MemoryProgramTable;

    fn trigger(max: usize) -> (DailyBackupTrigger, Arc<SnapshotBuilder>, Arc<MemoryBackupStore>) {
        let store = Arc::new(MemoryBackupStore::new());
        let table = Arc::new(MemoryProgramTable::new(fixtures::schedule()));
        let snapshots = Arc::new(SnapshotBuilder::new(store.clone(), table, &EngineConfig::default()));
        (DailyBackupTrigger::new(store.clone(), snapshots.clone(), max), snapshots, store)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[tokio::test]
    async fn test_second_fire_same_day_is_skipped() {
        let (trigger, _, store) = trigger(0);

        let created = match trigger.fire_on(day(1)).await.unwrap() {
            TriggerOutcome::Created(m) => m,
            other => panic!("expected a new backup, got {other:?}"),
        };
        match trigger.fire_on(day(1)).await.unwrap() {
            TriggerOutcome::Skipped { existing_id } => assert_eq!(existing_id, created.backup_id),
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(matches!(trigger.fire_on(day(2)).await.unwrap(), TriggerOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_manual_backup_with_daily_name_does_not_block_trigger() {
        let (trigger, snapshots, _) = trigger(0);
        snapshots
            .create(CreateBackupRequest::manual(Some(daily_description(day(1)))))
            .await
            .unwrap();
        assert!(matches!(trigger.fire_on(day(1)).await.unwrap(), TriggerOutcome::Created(_)));
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_daily_only() {
        let (trigger, snapshots, store) = trigger(2);
        let manual = snapshots.create(CreateBackupRequest::manual(None)).await.unwrap();

        for d in 1..=4 {
            trigger.fire_on(day(d)).await.unwrap();
            // keep creation timestamps strictly increasing
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let remaining = store.list().await.unwrap();
        let daily: Vec<_> = remaining
            .iter()
            .filter(|m| m.origin == BackupOrigin::Daily)
            .map(|m| m.description.as_str())
            .collect();
        assert_eq!(daily, vec!["Daily backup 2024-03-04", "Daily backup 2024-03-03"]);
        assert!(remaining.iter().any(|m| m.backup_id == manual.backup_id));
    }
}
