//! Machine-Program Backup Engine
//!
//! Point-in-time snapshots of the live machine-program schedule: capture,
//! checksummed storage, verification, transactional restore, and portable
//! export/import.

pub mod codec;
pub mod config;
pub mod model;
pub mod report;
pub mod restore;
pub mod schedule;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod table;
pub mod transfer;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use config::EngineConfig;
pub use model::{BackupMetadata, BackupOrigin, BackupResult, MachineProgramRecord, ProgramStatus, SnapshotFilter};
pub use service::BackupService;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
