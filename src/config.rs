// src/config.rs

//! Command-line/env configuration and per-data-type profiles.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mapping::{FanOutPolicy, SamplingSpec, SchemaRow};
use crate::parse::LogFormat;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "factload",
    version,
    about = "Clean event logs into facts and load them into DuckDB staging tables"
)]
pub struct Cli {
    /// Log files to load. When empty, files are discovered in --dir.
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Directory searched for log files.
    #[arg(short = 'd', long, env = "FACTLOAD_DIR", default_value = "/tmp/metric_events")]
    pub dir: PathBuf,

    /// Glob mask for log files inside --dir.
    #[arg(short = 'm', long, default_value = "*.log")]
    pub mask: String,

    /// Maximum number of discovered files per run.
    #[arg(short = 'i', long, default_value_t = 2000)]
    pub limit: usize,

    /// Data type; selects the log format and the mapping table.
    #[arg(short = 't', long = "type", env = "FACTLOAD_TYPE", default_value = "metric_events")]
    pub data_type: String,

    /// DuckDB database file.
    #[arg(long, env = "FACTLOAD_DB", default_value = "stats.duckdb")]
    pub db: PathBuf,

    /// GeoIP2/GeoLite2 City database.
    #[arg(
        long,
        env = "FACTLOAD_GEOIP",
        default_value = "/usr/local/share/GeoIP/GeoIP2-City.mmdb"
    )]
    pub geoip: PathBuf,

    /// Run without a geo database; geo fields come out empty.
    #[arg(long)]
    pub no_geoip: bool,

    /// Sampling filter `field[:prefix]`; defaults to the data type's profile.
    #[arg(short = 's', long)]
    pub sampling: Option<SamplingSpec>,

    /// `continue` or `first-match`; defaults to the data type's profile.
    #[arg(long)]
    pub fan_out: Option<FanOutPolicy>,

    /// Seconds to wait for a locked database before giving up.
    #[arg(long, default_value_t = 3)]
    pub lock_timeout: u64,

    /// Leave source files in place after a successful load.
    #[arg(long)]
    pub keep_source: bool,

    /// YAML list of `{from, to, type, mandatory}` rows that replaces the
    /// stored mapping table of the data type before loading.
    #[arg(long, value_name = "YAML")]
    pub mappings: Option<PathBuf>,

    /// Debug logging (RUST_LOG still wins when set).
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// How lines of one data type are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTypeProfile {
    pub format: LogFormat,
    pub fan_out: FanOutPolicy,
    pub sampling: SamplingSpec,
}

const METRIC_TYPES: [&str; 3] = ["metric_events", "metric_events_test", "metric_events_v5"];
const PLAYER_TYPES: [&str; 3] = ["player_events", "player_events_test", "player_events_v5"];

/// Profile for a known data type.
pub fn profile_for(data_type: &str) -> Option<DataTypeProfile> {
    let (format, fan_out, field) = if METRIC_TYPES.contains(&data_type) {
        (LogFormat::Assignment, FanOutPolicy::Continue, "u")
    } else if PLAYER_TYPES.contains(&data_type) {
        (LogFormat::Tagged, FanOutPolicy::FirstMatch, "cid")
    } else {
        return None;
    };
    Some(DataTypeProfile {
        format,
        fan_out,
        sampling: SamplingSpec {
            field: field.to_string(),
            prefix: None,
        },
    })
}

pub fn known_data_types() -> impl Iterator<Item = &'static str> {
    METRIC_TYPES.into_iter().chain(PLAYER_TYPES)
}

/// Fully resolved run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_type: String,
    pub profile: DataTypeProfile,
    pub db: PathBuf,
    pub geoip: Option<PathBuf>,
    pub lock_timeout: Duration,
    pub keep_source: bool,
    pub mappings: Option<PathBuf>,
}

impl Cli {
    /// Resolve the data type's profile and apply command-line overrides.
    pub fn settings(&self) -> Result<Settings> {
        let mut profile = profile_for(&self.data_type).ok_or_else(|| {
            anyhow!(
                "unknown data type `{}` (known: {})",
                self.data_type,
                known_data_types().collect::<Vec<_>>().join(", ")
            )
        })?;
        if let Some(sampling) = &self.sampling {
            profile.sampling = sampling.clone();
        }
        if let Some(fan_out) = self.fan_out {
            profile.fan_out = fan_out;
        }
        if self.limit == 0 {
            bail!("--limit must be at least 1");
        }

        Ok(Settings {
            data_type: self.data_type.clone(),
            profile,
            db: self.db.clone(),
            geoip: (!self.no_geoip).then(|| self.geoip.clone()),
            lock_timeout: Duration::from_secs(self.lock_timeout),
            keep_source: self.keep_source,
            mappings: self.mappings.clone(),
        })
    }
}

/// Read a YAML mapping seed file.
pub fn load_mapping_file(path: &Path) -> Result<Vec<SchemaRow>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading mapping file {}", path.display()))?;
    let rows: Vec<SchemaRow> = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing mapping file {}", path.display()))?;
    if rows.is_empty() {
        bail!("mapping file {} has no rows", path.display());
    }
    Ok(rows
        .into_iter()
        .map(|r| SchemaRow {
            source_field: r.source_field.to_lowercase(),
            ..r
        })
        .collect())
}
