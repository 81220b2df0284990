// src/store/mod.rs

//! Staging store: mapping tables, session bookkeeping and per-session
//! staging tables.
//!
//! [`StagingStore`] is the seam between the session orchestrator and the
//! database. [`DuckStore`] is the real thing; [`MemoryStore`] backs tests
//! and can be told to fail at a chosen step.

pub mod duck;
pub mod memory;

pub use duck::DuckStore;
pub use memory::{FailPoint, MemoryStore};

use anyhow::Result;
use chrono::NaiveDate;

use crate::mapping::SchemaRow;

/// One buffered fact, ready for bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRow {
    pub session_id: i64,
    /// Fact serialized as JSON.
    pub fact: String,
}

/// Aggregates written back to the session record on finalize.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub rows_processed: u64,
    pub rows_prepared: u64,
    pub ts_min: Option<i64>,
    pub ts_max: Option<i64>,
    /// UTC calendar date of `ts_min`.
    pub date: Option<NaiveDate>,
}

/// Persisted `upload_session` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: i64,
    pub log_filename: String,
    pub data_type: String,
    pub rows_processed: Option<i64>,
    pub rows_prepared: Option<i64>,
    pub ts_min: Option<i64>,
    pub ts_max: Option<i64>,
    pub dt: Option<NaiveDate>,
}

/// `<data_type>_upload_data_<session_id>`
pub fn staging_table_name(data_type: &str, session_id: i64) -> String {
    format!("{data_type}_upload_data_{session_id}")
}

pub trait StagingStore {
    /// Mapping rows for `data_type`, in table order.
    fn field_mappings(&self, data_type: &str) -> Result<Vec<SchemaRow>>;

    /// Replace the mapping table of `data_type` with `rows`.
    fn replace_field_mappings(&mut self, data_type: &str, rows: &[SchemaRow]) -> Result<()>;

    /// Register a new upload session and return its id.
    fn open_session(&mut self, filename: &str, data_type: &str) -> Result<i64>;

    fn session(&self, session_id: i64) -> Result<Option<SessionRecord>>;

    /// Start the transaction that finalizes a session. Dropping the returned
    /// value without [`StagingTransaction::commit`] rolls everything back.
    fn transaction(&mut self) -> Result<Box<dyn StagingTransaction + '_>>;
}

pub trait StagingTransaction {
    /// Drop `table` if present and recreate it shaped like `upload_data`.
    fn create_staging_table(&mut self, table: &str) -> Result<()>;

    /// Append every row to `table`; returns the number of rows loaded.
    fn bulk_load(
        &mut self,
        table: &str,
        rows: &mut dyn Iterator<Item = Result<StagedRow>>,
    ) -> Result<u64>;

    fn update_session_stats(&mut self, session_id: i64, stats: &SessionStats) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;
}
