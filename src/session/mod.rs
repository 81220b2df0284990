// src/session/mod.rs

//! One upload session: one log file, parsed line by line into a staging
//! buffer and loaded into its own staging table in a single transaction.

mod artifact;
mod buffer;
mod pipeline;

pub use artifact::{error_file_path, ErrorArtifact};
pub use buffer::{StagingBuffer, TS_FIELD};
pub use pipeline::Pipeline;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::geo::GeoCache;
use crate::mapping::MapOutcome;
use crate::store::{staging_table_name, SessionStats, StagingStore};

/// Progress is logged every this many lines.
pub const PROGRESS_EVERY: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Opened,
    Parsing,
    Finalizing,
    Committed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Opened => "Opened",
            SessionState::Parsing => "Parsing",
            SessionState::Finalizing => "Finalizing",
            SessionState::Committed => "Committed",
            SessionState::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadSession {
    pub id: i64,
    pub filename: String,
    pub data_type: String,
    pub state: SessionState,
    /// Every line read.
    pub rows_processed: u64,
    /// Lines that were not rejected (sampling drops included).
    pub rows_prepared: u64,
    /// Facts written to the staging table.
    pub rows_loaded: u64,
    pub ts_min: Option<i64>,
    pub ts_max: Option<i64>,
    pub date: Option<NaiveDate>,
    /// Where rejected lines were saved, if any were.
    pub error_file: Option<PathBuf>,
    pub elapsed: Duration,
}

impl UploadSession {
    fn opened(id: i64, filename: String, data_type: String) -> Self {
        Self {
            id,
            filename,
            data_type,
            state: SessionState::Opened,
            rows_processed: 0,
            rows_prepared: 0,
            rows_loaded: 0,
            ts_min: None,
            ts_max: None,
            date: None,
            error_file: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn rows_rejected(&self) -> u64 {
        self.rows_processed - self.rows_prepared
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            rows_processed: self.rows_processed,
            rows_prepared: self.rows_prepared,
            ts_min: self.ts_min,
            ts_max: self.ts_max,
            date: self.date,
        }
    }
}

/// UTC calendar date of an epoch-seconds timestamp.
pub fn utc_date(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

/// Load the staging table and session stats in one transaction.
fn finalize(
    store: &mut dyn StagingStore,
    session: &UploadSession,
    buffer: StagingBuffer,
) -> Result<u64> {
    let table = staging_table_name(&session.data_type, session.id);
    let mut tx = store.transaction()?;
    tx.create_staging_table(&table)?;
    let mut rows = buffer.into_rows()?;
    let loaded = tx.bulk_load(&table, &mut rows)?;
    tx.update_session_stats(session.id, &session.stats())?;
    tx.commit()?;
    Ok(loaded)
}

/// Run one file through `pipeline` into `store`.
///
/// Rejected lines never stop the file; they are written to
/// `<path>.<session_id>.error` once the session commits. Any finalize
/// failure rolls back the staging table and the session stats and is
/// returned as an error; the source file is never touched here.
#[tracing::instrument(
    level = "info",
    skip(store, pipeline, geo),
    fields(path = %path.display(), data_type = %pipeline.data_type)
)]
pub fn run_session(
    store: &mut dyn StagingStore,
    pipeline: &Pipeline,
    geo: &mut GeoCache,
    path: &Path,
) -> Result<UploadSession> {
    let started = Instant::now();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    // 1) Open
    let id = store.open_session(&filename, &pipeline.data_type)?;
    let mut session = UploadSession::opened(id, filename, pipeline.data_type.clone());
    info!(
        session_id = id,
        format = pipeline.format().as_str(),
        fan_out = pipeline.mapper().fan_out().as_str(),
        sampling = %pipeline.mapper().sampling(),
        "session opened"
    );

    // 2) Parse
    session.state = SessionState::Parsing;
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buffer = StagingBuffer::new()?;
    let mut errors = ErrorArtifact::beside(path)?;
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let n = reader
            .read_until(b'\n', &mut raw)
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&raw);
        let line = text.trim();
        session.rows_processed += 1;
        let row = session.rows_processed;

        match pipeline.process_line(line, geo) {
            Ok(MapOutcome::Fact(fact)) => {
                buffer.push(id, &fact)?;
                session.rows_prepared += 1;
            }
            Ok(MapOutcome::Dropped) => session.rows_prepared += 1,
            Err(e) => {
                warn!(row, error = %e, line, "row rejected");
                errors.record(row, &e, line)?;
            }
        }

        if row % PROGRESS_EVERY == 0 {
            info!(
                rows = row,
                prepared = session.rows_prepared,
                elapsed = ?started.elapsed(),
                "progress"
            );
        }
    }

    debug!(buffered = buffer.rows(), rejected = errors.rows(), "parse finished");
    (session.ts_min, session.ts_max) = buffer.ts_range();
    session.date = session.ts_min.and_then(utc_date);

    // 3) Finalize
    session.state = SessionState::Finalizing;
    match finalize(store, &session, buffer) {
        Ok(loaded) => {
            session.rows_loaded = loaded;
            session.state = SessionState::Committed;
        }
        Err(e) => {
            session.state = SessionState::Failed;
            error!(session_id = id, error = %format!("{e:#}"), "finalize failed, rolled back");
            return Err(e.context(format!(
                "finalizing session {id} for {}",
                path.display()
            )));
        }
    }

    // 4) Keep rejected lines next to the source
    session.error_file = errors.persist(&error_file_path(path, id))?;
    if let Some(err_path) = &session.error_file {
        warn!(
            rejected = session.rows_rejected(),
            file = %err_path.display(),
            "rejected lines saved"
        );
    }

    session.elapsed = started.elapsed();
    info!(
        session_id = id,
        state = session.state.as_str(),
        ts_min = ?session.ts_min,
        ts_max = ?session.ts_max,
        "{} of {} rows prepared in {:?}",
        session.rows_prepared,
        session.rows_processed,
        session.elapsed
    );
    Ok(session)
}
