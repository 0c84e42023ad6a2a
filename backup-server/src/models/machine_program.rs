use backup_engine::{MachineProgramRecord, ProgramStatus, SnapshotFilter};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Row};

const COLUMNS: &str = "machine_number, order_number, article_code, client, reference, colors, status, \
                       position, delivery_date, notes, created_at, updated_at";

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn format_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn row_to_record(row: &Row) -> rusqlite::Result<MachineProgramRecord> {
    let colors: String = row.get(5)?;
    let status: String = row.get(6)?;
    let delivery_date: Option<String> = row.get(8)?;
    let created_at: String = row.get(10)?;
    let updated_at: Option<String> = row.get(11)?;

    Ok(MachineProgramRecord {
        machine_number: row.get(0)?,
        order_number: row.get(1)?,
        article_code: row.get(2)?,
        client: row.get(3)?,
        reference: row.get(4)?,
        colors: serde_json::from_str(&colors).map_err(|e| conversion_error(5, e))?,
        status: status.parse::<ProgramStatus>().map_err(|e| {
            conversion_error(6, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?,
        position: row.get(7)?,
        delivery_date: delivery_date.as_deref().map(|v| parse_time(8, v)).transpose()?,
        notes: row.get(9)?,
        created_at: parse_time(10, &created_at)?,
        updated_at: updated_at.as_deref().map(|v| parse_time(11, v)).transpose()?,
    })
}

/// Live rows matching `filter`, in scheduling order.
///
/// A row that fails to convert is an error, never silently skipped: a
/// snapshot must not lose rows.
pub fn find_all(conn: &Connection, filter: &SnapshotFilter) -> anyhow::Result<Vec<MachineProgramRecord>> {
    let records = match filter {
        SnapshotFilter::All => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM machine_programs ORDER BY machine_number, position, id"
            ))?;
            let rows = stmt.query_map([], |row| row_to_record(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        SnapshotFilter::Machines(machines) => {
            let placeholders = vec!["?"; machines.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM machine_programs WHERE machine_number IN ({placeholders}) \
                 ORDER BY machine_number, position, id"
            ))?;
            let rows = stmt.query_map(params_from_iter(machines.iter()), |row| row_to_record(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    Ok(records)
}

pub fn insert(conn: &Connection, record: &MachineProgramRecord) -> anyhow::Result<i64> {
    conn.execute(
        &format!("INSERT INTO machine_programs ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
        params![
            record.machine_number,
            record.order_number,
            record.article_code,
            record.client,
            record.reference,
            serde_json::to_string(&record.colors)?,
            record.status.as_str(),
            record.position,
            record.delivery_date.as_ref().map(format_time),
            record.notes,
            format_time(&record.created_at),
            record.updated_at.as_ref().map(format_time),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Clear the table and insert `records` in one transaction. Any failure
/// rolls back, leaving the previous rows in place.
pub fn replace_all(conn: &mut Connection, records: &[MachineProgramRecord]) -> anyhow::Result<usize> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM machine_programs", [])?;
    for record in records {
        insert(&tx, record)?;
    }
    tx.commit()?;
    Ok(records.len())
}

pub fn count(conn: &Connection) -> anyhow::Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM machine_programs", [], |row| row.get(0))?)
}
