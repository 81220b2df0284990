// src/store/duck.rs

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use duckdb::{params, Connection, Transaction};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{SessionRecord, SessionStats, StagedRow, StagingStore, StagingTransaction};
use crate::mapping::SchemaRow;

const LOCK_RETRY: Duration = Duration::from_millis(100);

const SCHEMA_SQL: &str = "
CREATE SEQUENCE IF NOT EXISTS upload_session_id_seq START 1;

CREATE TABLE IF NOT EXISTS upload_session (
    id             BIGINT DEFAULT nextval('upload_session_id_seq'),
    log_filename   VARCHAR NOT NULL,
    data_type      VARCHAR NOT NULL,
    rows_processed BIGINT,
    rows_prepared  BIGINT,
    ts_min         BIGINT,
    ts_max         BIGINT,
    dt             DATE,
    created_at     TIMESTAMP DEFAULT current_timestamp
);

CREATE TABLE IF NOT EXISTS upload_data (
    session_id BIGINT,
    fact       VARCHAR
);

CREATE TABLE IF NOT EXISTS upload_session_field (
    data_type    VARCHAR NOT NULL,
    ordinal      INTEGER NOT NULL,
    field_from   VARCHAR NOT NULL,
    field_to     VARCHAR NOT NULL,
    field_type   VARCHAR NOT NULL,
    is_mandatory BOOLEAN NOT NULL DEFAULT false
);
";

fn is_lock_conflict(err: &duckdb::Error) -> bool {
    err.to_string().to_lowercase().contains("lock")
}

/// DuckDB-backed [`StagingStore`].
pub struct DuckStore {
    conn: Connection,
}

impl DuckStore {
    /// Open (or create) the database at `path`.
    ///
    /// Another process holding the file lock is waited out for up to
    /// `lock_timeout`; after that the conflict is returned as an error.
    pub fn open(path: &Path, lock_timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + lock_timeout;
        let mut attempt = 0u32;
        let conn = loop {
            attempt += 1;
            match Connection::open(path) {
                Ok(conn) => break conn,
                Err(e) if is_lock_conflict(&e) && Instant::now() < deadline => {
                    debug!(attempt, error = %e, "database locked, retrying");
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("opening database {}", path.display()))
                }
            }
        };
        info!(path = %path.display(), attempt, "database opened");
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("creating staging schema")?;
        Ok(Self { conn })
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
                params![table],
                |r| r.get(0),
            )
            .with_context(|| format!("looking up table {table}"))?;
        Ok(n > 0)
    }

    /// Rows of a staging table, in load order.
    pub fn staged_rows(&self, table: &str) -> Result<Vec<StagedRow>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT session_id, fact FROM \"{table}\""))
            .with_context(|| format!("reading {table}"))?;
        let rows = stmt
            .query_map([], |r| {
                Ok(StagedRow {
                    session_id: r.get(0)?,
                    fact: r.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl StagingStore for DuckStore {
    fn field_mappings(&self, data_type: &str) -> Result<Vec<SchemaRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT field_from, field_to, field_type, is_mandatory
               FROM upload_session_field
              WHERE data_type = ?
              ORDER BY ordinal",
        )?;
        let rows = stmt
            .query_map(params![data_type], |r| {
                Ok(SchemaRow {
                    source_field: r.get(0)?,
                    target_field: r.get(1)?,
                    transform_kind: r.get(2)?,
                    mandatory: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("loading field mappings for {data_type}"))?;
        Ok(rows)
    }

    fn replace_field_mappings(&mut self, data_type: &str, rows: &[SchemaRow]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM upload_session_field WHERE data_type = ?",
            params![data_type],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO upload_session_field
                    (data_type, ordinal, field_from, field_to, field_type, is_mandatory)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for (ordinal, row) in rows.iter().enumerate() {
                stmt.execute(params![
                    data_type,
                    ordinal as i64,
                    row.source_field,
                    row.target_field,
                    row.transform_kind,
                    row.mandatory,
                ])?;
            }
        }
        tx.commit()
            .with_context(|| format!("storing field mappings for {data_type}"))?;
        info!(data_type, rows = rows.len(), "field mappings replaced");
        Ok(())
    }

    fn open_session(&mut self, filename: &str, data_type: &str) -> Result<i64> {
        let id: i64 = self
            .conn
            .query_row(
                "INSERT INTO upload_session (log_filename, data_type) VALUES (?, ?) RETURNING id",
                params![filename, data_type],
                |r| r.get(0),
            )
            .with_context(|| format!("opening upload session for {filename}"))?;
        Ok(id)
    }

    fn session(&self, session_id: i64) -> Result<Option<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, log_filename, data_type, rows_processed, rows_prepared,
                    ts_min, ts_max, CAST(dt AS VARCHAR)
               FROM upload_session
              WHERE id = ?",
        )?;
        let found = stmt
            .query_map(params![session_id], |r| {
                Ok((
                    SessionRecord {
                        id: r.get(0)?,
                        log_filename: r.get(1)?,
                        data_type: r.get(2)?,
                        rows_processed: r.get(3)?,
                        rows_prepared: r.get(4)?,
                        ts_min: r.get(5)?,
                        ts_max: r.get(6)?,
                        dt: None,
                    },
                    r.get::<_, Option<String>>(7)?,
                ))
            })?
            .next()
            .transpose()
            .with_context(|| format!("reading upload session {session_id}"))?;

        let Some((mut record, dt)) = found else {
            return Ok(None);
        };
        record.dt = dt
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
            .transpose()
            .context("parsing session date")?;
        Ok(Some(record))
    }

    fn transaction(&mut self) -> Result<Box<dyn StagingTransaction + '_>> {
        let tx = self
            .conn
            .transaction()
            .context("starting staging transaction")?;
        Ok(Box::new(DuckTransaction { tx }))
    }
}

struct DuckTransaction<'a> {
    tx: Transaction<'a>,
}

impl StagingTransaction for DuckTransaction<'_> {
    fn create_staging_table(&mut self, table: &str) -> Result<()> {
        self.tx
            .execute_batch(&format!(
                "DROP TABLE IF EXISTS \"{table}\";
                 CREATE TABLE \"{table}\" AS SELECT * FROM upload_data LIMIT 0;"
            ))
            .with_context(|| format!("creating staging table {table}"))
    }

    fn bulk_load(
        &mut self,
        table: &str,
        rows: &mut dyn Iterator<Item = Result<StagedRow>>,
    ) -> Result<u64> {
        let mut appender = self
            .tx
            .appender(table)
            .with_context(|| format!("appender for {table}"))?;
        let mut loaded = 0u64;
        for row in rows {
            let row = row?;
            appender.append_row(params![row.session_id, row.fact])?;
            loaded += 1;
        }
        appender
            .flush()
            .with_context(|| format!("flushing {table}"))?;
        Ok(loaded)
    }

    fn update_session_stats(&mut self, session_id: i64, stats: &SessionStats) -> Result<()> {
        let changed = self
            .tx
            .execute(
                "UPDATE upload_session
                    SET rows_processed = ?,
                        rows_prepared = ?,
                        ts_min = ?,
                        ts_max = ?,
                        dt = CAST(? AS DATE)
                  WHERE id = ?",
                params![
                    i64::try_from(stats.rows_processed)?,
                    i64::try_from(stats.rows_prepared)?,
                    stats.ts_min,
                    stats.ts_max,
                    stats.date.map(|d| d.format("%Y-%m-%d").to_string()),
                    session_id,
                ],
            )
            .with_context(|| format!("updating upload session {session_id}"))?;
        if changed != 1 {
            bail!("upload session {session_id} not found");
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().context("committing staging transaction")
    }
}
