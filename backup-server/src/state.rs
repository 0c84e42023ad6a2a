use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::services::program_table::SqliteProgramTable;
use crate::ws::ui::UiBroadcaster;
use backup_engine::store::FsBackupStore;
use backup_engine::BackupService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub ui: UiBroadcaster,
    pub backups: Arc<BackupService>,
    /// Cancelled on shutdown; long-running operations take child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub async fn new(db: DbPool, config: AppConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let store = Arc::new(FsBackupStore::open(&config.backups_dir).await?);
        let table = Arc::new(SqliteProgramTable::new(db.clone()));
        let backups = Arc::new(BackupService::new(store, table, config.engine()));
        Ok(Self {
            db,
            config,
            ui: UiBroadcaster::new(),
            backups,
            shutdown,
        })
    }
}
