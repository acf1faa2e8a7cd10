use super::commit_sink::{CommitSink, SinkError, TableRef};
use super::sqlite_pragma::apply_optimized_pragmas;
use crate::ride_core::batch::RideBatch;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite commit sink
///
/// Tables, all prefixed with the configured schema:
/// - `<schema>_<table>` - one row per persisted log line (append-only)
/// - `<schema>_rides` - one summary row per committed ride
/// - `<schema>_riders` - first profile seen for each user id
pub struct SqliteCommitSink {
    conn: Mutex<Option<Connection>>,
    rows_table: TableRef,
}

impl SqliteCommitSink {
    pub fn new(db_path: impl AsRef<Path>, rows_table: TableRef) -> Result<Self, SinkError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SinkError::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to create database directory {}: {}", parent.display(), e),
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        create_tables(&conn, &rows_table)?;

        log::info!("✅ SQLite commit sink initialized ({})", rows_table);

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            rows_table,
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, SinkError>,
    ) -> Result<T, SinkError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| SinkError::Database("connection lock poisoned".to_string()))?;
        let conn = guard.as_mut().ok_or(SinkError::Closed)?;
        f(conn)
    }
}

fn create_tables(conn: &Connection, rows_table: &TableRef) -> Result<(), SinkError> {
    let rows = rows_table.qualified();
    let rides = rows_table.sibling("rides").qualified();
    let riders = rows_table.sibling("riders").qualified();

    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{rows}" (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ride_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            logged_at TEXT,
            log TEXT NOT NULL,
            fields TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS "idx_{rows}_ride_id" ON "{rows}"(ride_id);

        CREATE TABLE IF NOT EXISTS "{rides}" (
            ride_id INTEGER PRIMARY KEY,
            user_id INTEGER,
            start_time TEXT,
            end_time TEXT,
            total_duration_secs INTEGER,
            max_heart_rate_bpm INTEGER,
            min_heart_rate_bpm INTEGER,
            avg_heart_rate_bpm INTEGER,
            avg_resistance INTEGER,
            avg_rpm INTEGER,
            total_power_kilojoules REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS "{riders}" (
            user_id INTEGER PRIMARY KEY,
            name TEXT,
            gender TEXT,
            date_of_birth INTEGER,
            height_cm INTEGER,
            weight_kg INTEGER,
            address TEXT,
            email_address TEXT,
            account_created INTEGER,
            bike_serial TEXT,
            original_source TEXT,
            age INTEGER
        );
        "#
    ))?;

    Ok(())
}

#[async_trait]
impl CommitSink for SqliteCommitSink {
    async fn write_batch(&mut self, batch: &RideBatch) -> Result<usize, SinkError> {
        let rows = self.rows_table.qualified();
        let rides = self.rows_table.sibling("rides").qualified();
        let riders = self.rows_table.sibling("riders").qualified();

        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            {
                let mut insert_row = tx.prepare(&format!(
                    r#"INSERT INTO "{rows}" (ride_id, kind, logged_at, log, fields)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#
                ))?;
                for row in &batch.rows {
                    let kind = row.fields.get("kind").and_then(|v| v.as_str()).unwrap_or("unclassified");
                    let logged_at = row.fields.get("timestamp").and_then(|v| v.as_str());
                    let log = row.fields.get("log").and_then(|v| v.as_str()).unwrap_or_default();
                    let fields = serde_json::to_string(&row.fields)?;
                    insert_row.execute(params![row.ride_id, kind, logged_at, log, fields])?;
                }
            }

            let s = &batch.summary;
            tx.execute(
                &format!(
                    r#"INSERT OR REPLACE INTO "{rides}"
                       (ride_id, user_id, start_time, end_time, total_duration_secs,
                        max_heart_rate_bpm, min_heart_rate_bpm, avg_heart_rate_bpm,
                        avg_resistance, avg_rpm, total_power_kilojoules)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#
                ),
                params![
                    s.ride_id,
                    s.user_id,
                    s.start_time.map(|t| t.format(DATETIME_FORMAT).to_string()),
                    s.end_time.map(|t| t.format(DATETIME_FORMAT).to_string()),
                    s.total_duration_secs,
                    s.max_heart_rate_bpm,
                    s.min_heart_rate_bpm,
                    s.avg_heart_rate_bpm,
                    s.avg_resistance,
                    s.avg_rpm,
                    s.total_power_kilojoules,
                ],
            )?;

            if let Some(rider) = batch.rider.as_ref().filter(|r| r.user_id.is_some()) {
                let inserted = tx.execute(
                    &format!(
                        r#"INSERT OR IGNORE INTO "{riders}"
                           (user_id, name, gender, date_of_birth, height_cm, weight_kg,
                            address, email_address, account_created, bike_serial, original_source, age)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#
                    ),
                    params![
                        rider.user_id,
                        rider.name,
                        rider.gender,
                        rider.date_of_birth,
                        rider.height_cm,
                        rider.weight_kg,
                        rider.address,
                        rider.email_address,
                        rider.account_created,
                        rider.bike_serial,
                        rider.original_source,
                        batch.rider_age,
                    ],
                )?;
                if inserted == 0 {
                    log::debug!("user_id {:?} already in riders table", rider.user_id);
                }
            }

            tx.commit()?;
            Ok(())
        })?;

        log::debug!(
            "✅ Committed ride {} ({} rows) to {}",
            batch.ride_id,
            batch.row_count(),
            self.rows_table
        );

        Ok(batch.row_count())
    }

    async fn max_committed_ride_id(&self, table: &TableRef) -> Result<i64, SinkError> {
        let name = table.qualified();
        self.with_conn(|conn| {
            let exists = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![name],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .is_some();

            if !exists {
                return Ok(0);
            }

            let max_id: i64 = conn.query_row(
                &format!(r#"SELECT COALESCE(MAX(ride_id), 0) FROM "{name}""#),
                [],
                |row| row.get(0),
            )?;
            Ok(max_id)
        })
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SinkError::Database("connection lock poisoned".to_string()))?
            .take();

        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| SinkError::from(e))?;
            log::info!("🔒 SQLite commit sink closed");
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
