// src/store/memory.rs

use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;

use super::{SessionRecord, SessionStats, StagedRow, StagingStore, StagingTransaction};
use crate::mapping::SchemaRow;

/// Step of the finalize transaction at which [`MemoryStore`] should fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    CreateTable,
    BulkLoad,
    UpdateStats,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct State {
    sessions: BTreeMap<i64, SessionRecord>,
    tables: BTreeMap<String, Vec<StagedRow>>,
}

/// In-process [`StagingStore`] with optional failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: State,
    mappings: BTreeMap<String, Vec<SchemaRow>>,
    next_id: i64,
    fail_at: Option<FailPoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mappings(data_type: &str, rows: Vec<SchemaRow>) -> Self {
        let mut store = Self::new();
        store.mappings.insert(data_type.to_string(), rows);
        store
    }

    /// Make every later finalize transaction fail at `point`.
    pub fn fail_at(&mut self, point: Option<FailPoint>) {
        self.fail_at = point;
    }

    pub fn table(&self, name: &str) -> Option<&[StagedRow]> {
        self.state.tables.get(name).map(Vec::as_slice)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.tables.keys().cloned().collect()
    }
}

impl StagingStore for MemoryStore {
    fn field_mappings(&self, data_type: &str) -> Result<Vec<SchemaRow>> {
        Ok(self.mappings.get(data_type).cloned().unwrap_or_default())
    }

    fn replace_field_mappings(&mut self, data_type: &str, rows: &[SchemaRow]) -> Result<()> {
        self.mappings.insert(data_type.to_string(), rows.to_vec());
        Ok(())
    }

    fn open_session(&mut self, filename: &str, data_type: &str) -> Result<i64> {
        self.next_id += 1;
        let id = self.next_id;
        self.state.sessions.insert(
            id,
            SessionRecord {
                id,
                log_filename: filename.to_string(),
                data_type: data_type.to_string(),
                rows_processed: None,
                rows_prepared: None,
                ts_min: None,
                ts_max: None,
                dt: None,
            },
        );
        Ok(id)
    }

    fn session(&self, session_id: i64) -> Result<Option<SessionRecord>> {
        Ok(self.state.sessions.get(&session_id).cloned())
    }

    fn transaction(&mut self) -> Result<Box<dyn StagingTransaction + '_>> {
        let pending = self.state.clone();
        Ok(Box::new(MemoryTransaction {
            store: self,
            pending,
        }))
    }
}

/// Works on a copy of the store state; commit swaps it in.
struct MemoryTransaction<'a> {
    store: &'a mut MemoryStore,
    pending: State,
}

impl MemoryTransaction<'_> {
    fn check(&self, point: FailPoint) -> Result<()> {
        if self.store.fail_at == Some(point) {
            bail!("injected failure at {point:?}");
        }
        Ok(())
    }
}

impl StagingTransaction for MemoryTransaction<'_> {
    fn create_staging_table(&mut self, table: &str) -> Result<()> {
        self.check(FailPoint::CreateTable)?;
        self.pending.tables.insert(table.to_string(), Vec::new());
        Ok(())
    }

    fn bulk_load(
        &mut self,
        table: &str,
        rows: &mut dyn Iterator<Item = Result<StagedRow>>,
    ) -> Result<u64> {
        let buffered = rows.collect::<Result<Vec<_>>>()?;
        self.check(FailPoint::BulkLoad)?;
        let target = self
            .pending
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("table {table} does not exist"))?;
        let loaded = buffered.len() as u64;
        target.extend(buffered);
        Ok(loaded)
    }

    fn update_session_stats(&mut self, session_id: i64, stats: &SessionStats) -> Result<()> {
        self.check(FailPoint::UpdateStats)?;
        let record = self
            .pending
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| anyhow!("upload session {session_id} not found"))?;
        record.rows_processed = Some(i64::try_from(stats.rows_processed)?);
        record.rows_prepared = Some(i64::try_from(stats.rows_prepared)?);
        record.ts_min = stats.ts_min;
        record.ts_max = stats.ts_max;
        record.dt = stats.date;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.check(FailPoint::Commit)?;
        let MemoryTransaction { store, pending } = *self;
        store.state = pending;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_step_leaves_state_untouched() -> Result<()> {
        let mut store = MemoryStore::new();
        let id = store.open_session("a.log", "t")?;
        store.fail_at(Some(FailPoint::Commit));
        {
            let mut tx = store.transaction()?;
            tx.create_staging_table("t_upload_data_1")?;
            tx.update_session_stats(
                id,
                &SessionStats {
                    rows_processed: 1,
                    ..Default::default()
                },
            )?;
            assert!(tx.commit().is_err());
        }
        assert!(store.table_names().is_empty());
        assert_eq!(store.session(id)?.and_then(|s| s.rows_processed), None);
        Ok(())
    }

    #[test]
    fn bulk_load_needs_the_table() {
        let mut store = MemoryStore::new();
        let mut tx = store.transaction().unwrap();
        let mut rows = std::iter::empty::<Result<StagedRow>>();
        assert!(tx.bulk_load("missing", &mut rows).is_err());
    }
}
