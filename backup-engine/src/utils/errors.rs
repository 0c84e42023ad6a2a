//! Error taxonomy for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Backup is corrupt: {0}")]
    CorruptBackup(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported backup format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Safety backup failed, restore aborted: {0}")]
    SafetyBackupFailed(String),

    #[error("Refusing to create an empty snapshot")]
    EmptySnapshot,

    #[error("Store I/O error: {0}")]
    StoreIo(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Live table error: {0}")]
    Table(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BackupError {
    /// Short machine-readable kind, used in logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::NotFound(_) => "NotFound",
            BackupError::CorruptBackup(_) => "CorruptBackup",
            BackupError::UnsupportedFormat(_) => "UnsupportedFormat",
            BackupError::UnsupportedVersion(_) => "UnsupportedVersion",
            BackupError::SafetyBackupFailed(_) => "SafetyBackupFailed",
            BackupError::EmptySnapshot => "EmptySnapshot",
            BackupError::StoreIo(_) => "StoreIOError",
            BackupError::Validation(_) => "ValidationError",
            BackupError::Table(_) => "TableError",
            BackupError::Serialization(_) => "SerializationError",
            BackupError::Cancelled => "Cancelled",
        }
    }
}

/// Reading an uploaded archive. Export maps its own packing errors to
/// `StoreIo`.
impl From<zip::result::ZipError> for BackupError {
    fn from(e: zip::result::ZipError) -> Self {
        BackupError::CorruptBackup(format!("invalid zip container: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
