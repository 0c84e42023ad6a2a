//! Engine configuration.
//!
//! Handed to [`crate::BackupService::new`] explicitly; the engine keeps no
//! global state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Refuse to create snapshots of an empty live table.
    #[serde(default)]
    pub require_non_empty: bool,

    /// Daily artifacts kept by the scheduled trigger (0 keeps all)
    #[serde(default = "default_max_daily_backups")]
    pub max_daily_backups: usize,

    /// Largest backup document accepted on import, after decompression.
    #[serde(default = "default_max_import_bytes")]
    pub max_import_bytes: u64,
}

fn default_max_daily_backups() -> usize {
    30
}

fn default_max_import_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            require_non_empty: false,
            max_daily_backups: default_max_daily_backups(),
            max_import_bytes: default_max_import_bytes(),
        }
    }
}
