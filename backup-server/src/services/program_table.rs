use crate::db::connection::DbPool;
use crate::models::machine_program;
use async_trait::async_trait;
use backup_engine::table::ProgramTable;
use backup_engine::{BackupError, MachineProgramRecord, SnapshotFilter};

/// The live `machine_programs` table, as seen by the backup engine.
pub struct SqliteProgramTable {
    db: DbPool,
}

impl SqliteProgramTable {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn table_error(e: impl std::fmt::Display) -> BackupError {
    BackupError::Table(e.to_string())
}

#[async_trait]
impl ProgramTable for SqliteProgramTable {
    async fn scan(&self, filter: &SnapshotFilter) -> backup_engine::Result<Vec<MachineProgramRecord>> {
        let db = self.db.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            machine_program::find_all(&conn, &filter)
        })
        .await
        .map_err(table_error)?
        .map_err(|e| table_error(format!("{e:#}")))
    }

    async fn replace_all(&self, records: &[MachineProgramRecord]) -> backup_engine::Result<()> {
        let db = self.db.clone();
        let records = records.to_vec();
        let replaced = tokio::task::spawn_blocking(move || {
            let mut conn = db.get()?;
            machine_program::replace_all(&mut conn, &records)
        })
        .await
        .map_err(table_error)?
        .map_err(|e| table_error(format!("{e:#}")))?;
        tracing::debug!(rows = replaced, "Live machine-program table replaced");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use crate::db::migrate::migrate;
    use backup_engine::ProgramStatus;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    pub fn record(order: &str, machine: i32) -> MachineProgramRecord {
        MachineProgramRecord {
            machine_number: machine,
            order_number: order.to_string(),
            article_code: format!("ART-{order}"),
            client: Some("Acme Labels".to_string()),
            reference: Some("PO-7781".to_string()),
            colors: vec!["CYAN".to_string(), "PANTONE 185 C".to_string()],
            status: ProgramStatus::Ready,
            position: Some(1),
            delivery_date: Some(Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap()),
            notes: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap(),
            updated_at: None,
        }
    }

    pub fn schedule() -> Vec<MachineProgramRecord> {
        vec![record("F1", 11), record("F2", 12), record("F3", 12)]
    }

    pub fn seeded_pool(dir: &TempDir) -> DbPool {
        let path = dir.path().join("test.db");
        let pool = create_pool(path.to_str().unwrap()).unwrap();
        migrate(&pool).unwrap();
        let conn = pool.get().unwrap();
        for r in schedule() {
            machine_program::insert(&conn, &r).unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_scan_round_trips_every_field() {
        let dir = TempDir::new().unwrap();
        let table = SqliteProgramTable::new(seeded_pool(&dir));
        assert_eq!(table.scan(&SnapshotFilter::All).await.unwrap(), schedule());

        let only_12 = table.scan(&SnapshotFilter::Machines(vec![12])).await.unwrap();
        assert_eq!(only_12.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_all_swaps_contents() {
        let dir = TempDir::new().unwrap();
        let pool = seeded_pool(&dir);
        let table = SqliteProgramTable::new(pool.clone());

        let replacement = vec![record("G1", 14)];
        table.replace_all(&replacement).await.unwrap();
        assert_eq!(table.scan(&SnapshotFilter::All).await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn test_failed_replace_rolls_back() {
        let dir = TempDir::new().unwrap();
        let pool = seeded_pool(&dir);
        let table = SqliteProgramTable::new(pool.clone());

        // the last row violates CHECK(machine_number > 0) after the delete and two inserts ran
        let mut broken = schedule();
        broken.push(record("F4", 0));
        let result = table.replace_all(&broken).await;
        assert!(matches!(result, Err(BackupError::Table(_))));

        assert_eq!(table.scan(&SnapshotFilter::All).await.unwrap(), schedule());
        assert_eq!(machine_program::count(&pool.get().unwrap()).unwrap(), 3);
    }
}
