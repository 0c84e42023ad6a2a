use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS machine_programs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  machine_number INTEGER NOT NULL CHECK(machine_number > 0),
  order_number TEXT NOT NULL,
  article_code TEXT NOT NULL,
  client TEXT,
  reference TEXT,
  colors TEXT NOT NULL DEFAULT '[]',
  status TEXT NOT NULL DEFAULT 'PENDING' CHECK(status IN ('PENDING','READY','RUNNING','SUSPENDED','FINISHED')),
  position INTEGER,
  delivery_date TEXT,
  created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
  updated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_machine_programs_machine ON machine_programs(machine_number, position);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for existing databases
    let has_column = |table: &str, column: &str| -> anyhow::Result<bool> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns.iter().any(|c| c == column))
    };

    if !has_column("machine_programs", "notes")? {
        conn.execute_batch("ALTER TABLE machine_programs ADD COLUMN notes TEXT")?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
