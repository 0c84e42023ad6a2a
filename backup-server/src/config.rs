use backup_engine::EngineConfig;
use std::path::PathBuf;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub backups_dir: PathBuf,
    pub log_level: String,
    pub max_upload_bytes: usize,
    pub daily_backup_cron: String,
    pub max_daily_backups: usize,
    pub require_non_empty_backups: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("machine-programs.db")),
            backups_dir: std::env::var("BACKUPS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("machine-backups")),
            data_dir,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            daily_backup_cron: std::env::var("DAILY_BACKUP_CRON")
                .unwrap_or_else(|_| "0 0 2 * * *".into()),
            max_daily_backups: std::env::var("MAX_DAILY_BACKUPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            require_non_empty_backups: std::env::var("REQUIRE_NON_EMPTY_BACKUPS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            require_non_empty: self.require_non_empty_backups,
            max_daily_backups: self.max_daily_backups,
            max_import_bytes: self.max_upload_bytes as u64,
        }
    }
}
