//! Seam to the live machine-program table.
//!
//! The engine never talks to a database directly: the host application
//! provides a [`ProgramTable`] that can scan the live rows and replace them
//! in a single transaction.

use crate::model::{MachineProgramRecord, SnapshotFilter};
use crate::{BackupError, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait ProgramTable: Send + Sync {
    /// Read the live rows matching `filter`.
    async fn scan(&self, filter: &SnapshotFilter) -> Result<Vec<MachineProgramRecord>>;

    /// Atomically replace every live row with `records`.
    ///
    /// Either all of `records` become the table's contents or, on any
    /// failure, the table is left exactly as it was.
    async fn replace_all(&self, records: &[MachineProgramRecord]) -> Result<()>;
}

/// In-memory live table.
#[derive(Default)]
pub struct MemoryProgramTable {
    rows: RwLock<Vec<MachineProgramRecord>>,
}

impl MemoryProgramTable {
    pub fn new(rows: Vec<MachineProgramRecord>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub async fn rows(&self) -> Vec<MachineProgramRecord> {
        self.rows.read().await.clone()
    }

    /// Remove live rows by order number, the way schedulers clear finished work.
    pub async fn remove_order(&self, order_number: &str) -> usize {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.order_number != order_number);
        before - rows.len()
    }
}

#[async_trait]
impl ProgramTable for MemoryProgramTable {
    async fn scan(&self, filter: &SnapshotFilter) -> Result<Vec<MachineProgramRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn replace_all(&self, records: &[MachineProgramRecord]) -> Result<()> {
        if let Some(bad) = records.iter().find(|r| r.machine_number <= 0) {
            return Err(BackupError::Table(format!(
                "order {} has invalid machine number {}",
                bad.order_number, bad.machine_number
            )));
        }
        *self.rows.write().await = records.to_vec();
        Ok(())
    }
}
