//! Snapshot builder: captures the live table into a new artifact.

use crate::codec::{self, MetadataDraft};
use crate::config::EngineConfig;
use crate::model::{new_backup_id, BackupMetadata, BackupOrigin, SnapshotFilter};
use crate::store::BackupStore;
use crate::table::ProgramTable;
use crate::{BackupError, Result};
use chrono::{Local, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Parameters of one snapshot.
#[derive(Debug, Clone)]
pub struct CreateBackupRequest {
    pub description: Option<String>,
    pub filter: SnapshotFilter,
    pub origin: BackupOrigin,
    /// Overrides [`EngineConfig::require_non_empty`] when set.
    pub require_non_empty: Option<bool>,
}

impl CreateBackupRequest {
    pub fn manual(description: Option<String>) -> Self {
        Self {
            description,
            filter: SnapshotFilter::All,
            origin: BackupOrigin::Manual,
            require_non_empty: None,
        }
    }

    /// Pre-restore capture. An empty live table is still worth saving.
    pub fn safety(restoring: &str) -> Self {
        Self {
            description: Some(format!("Safety backup before restoring {restoring}")),
            filter: SnapshotFilter::All,
            origin: BackupOrigin::Safety,
            require_non_empty: Some(false),
        }
    }
}

/// Description given to the daily artifact of `date`.
pub fn daily_description(date: NaiveDate) -> String {
    format!("Daily backup {}", date.format("%Y-%m-%d"))
}

pub struct SnapshotBuilder {
    store: Arc<dyn BackupStore>,
    table: Arc<dyn ProgramTable>,
    require_non_empty: bool,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn BackupStore>, table: Arc<dyn ProgramTable>, config: &EngineConfig) -> Self {
        Self {
            store,
            table,
            require_non_empty: config.require_non_empty,
        }
    }

    pub async fn create(&self, request: CreateBackupRequest) -> Result<BackupMetadata> {
        if let SnapshotFilter::Machines(machines) = &request.filter {
            if machines.is_empty() {
                return Err(BackupError::Validation(
                    "a machine filter needs at least one machine number".into(),
                ));
            }
        }

        let records = self.table.scan(&request.filter).await?;
        let require_non_empty = request.require_non_empty.unwrap_or(self.require_non_empty);
        if records.is_empty() {
            if require_non_empty {
                return Err(BackupError::EmptySnapshot);
            }
            warn!(origin = ?request.origin, "Capturing an empty machine-program table");
        }

        let now = Utc::now();
        let description = request
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("Manual backup {}", now.format("%Y-%m-%d %H:%M:%S")));

        let artifact = codec::encode(
            MetadataDraft {
                backup_id: new_backup_id(now),
                description,
                created_at: now,
                origin: request.origin,
                source_backup_id: None,
                source_file_name: None,
            },
            &records,
        )?;
        self.store.write(&artifact).await?;

        let metadata = artifact.metadata;
        info!(
            backup_id = %metadata.backup_id,
            origin = ?metadata.origin,
            records = metadata.total_records,
            machines = metadata.machine_count,
            bytes = metadata.backup_size_bytes,
            "Backup created"
        );
        Ok(metadata)
    }

    /// Daily snapshot of the whole table. One-per-day is the trigger's policy,
    /// not enforced here.
    pub async fn create_daily(&self) -> Result<BackupMetadata> {
        self.create_daily_for(Local::now().date_naive()).await
    }

    pub async fn create_daily_for(&self, date: NaiveDate) -> Result<BackupMetadata> {
        self.create(CreateBackupRequest {
            description: Some(daily_description(date)),
            filter: SnapshotFilter::All,
            origin: BackupOrigin::Daily,
            require_non_empty: None,
        })
        .await
    }
}
