// src/run.rs

//! Batch driver: build the pipeline for a data type and push files through
//! it one session at a time.

use anyhow::{bail, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::DataTypeProfile;
use crate::geo::GeoCache;
use crate::mapping::Mapper;
use crate::session::{run_session, Pipeline, UploadSession};
use crate::store::StagingStore;

/// Load the mapping table of `data_type` and build its pipeline.
pub fn build_pipeline(
    store: &dyn StagingStore,
    data_type: &str,
    profile: &DataTypeProfile,
) -> Result<Pipeline> {
    let rows = store.field_mappings(data_type)?;
    if rows.is_empty() {
        bail!("no field mappings stored for data type `{data_type}`");
    }
    let mapper = Mapper::new(&rows, profile.sampling.clone(), profile.fan_out)?;
    info!(
        data_type,
        mappings = rows.len(),
        format = profile.format.as_str(),
        fan_out = profile.fan_out.as_str(),
        sampling = %profile.sampling,
        "pipeline ready"
    );
    Ok(Pipeline::new(data_type, profile.format, mapper))
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub committed: Vec<UploadSession>,
    pub failed: Vec<PathBuf>,
}

impl RunSummary {
    pub fn all_committed(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Load every file in order. A failed file is logged and left in place;
/// the run moves on to the next one.
pub fn process_files(
    store: &mut dyn StagingStore,
    pipeline: &Pipeline,
    geo: &mut GeoCache,
    files: &[PathBuf],
    keep_source: bool,
) -> RunSummary {
    info!(files = files.len(), "processing files");
    let mut summary = RunSummary::default();

    for path in files {
        match run_session(store, pipeline, geo, path) {
            Ok(session) => {
                if !keep_source {
                    remove_source(path);
                }
                summary.committed.push(session);
            }
            Err(e) => {
                error!(path = %path.display(), error = %format!("{e:#}"), "file not loaded");
                summary.failed.push(path.clone());
            }
        }
    }

    info!(
        committed = summary.committed.len(),
        failed = summary.failed.len(),
        geo_lookups = geo.lookups(),
        "run finished"
    );
    summary
}

fn remove_source(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove loaded file");
    }
}
