use anyhow::Result;
use clap::Parser;
use factload::{
    config::{load_mapping_file, Cli, Settings},
    discover::find_log_files,
    geo::{GeoCache, GeoLookup, MaxMindLookup, NoGeo},
    run::{build_pipeline, process_files},
    store::{DuckStore, StagingStore},
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    let default_level = if cli.verbose { "debug" } else { "info" };
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!(error = %format!("{e:#}"), "startup failed");
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` when at least one file failed to load.
fn run(cli: &Cli) -> Result<bool> {
    // ─── 2) resolve settings ─────────────────────────────────────────
    let settings: Settings = cli.settings()?;

    // ─── 3) open store, seed mappings ────────────────────────────────
    let mut store = DuckStore::open(&settings.db, settings.lock_timeout)?;
    if let Some(path) = &settings.mappings {
        let rows = load_mapping_file(path)?;
        store.replace_field_mappings(&settings.data_type, &rows)?;
    }
    let pipeline = build_pipeline(&store, &settings.data_type, &settings.profile)?;

    // ─── 4) geo database ─────────────────────────────────────────────
    let lookup: Box<dyn GeoLookup> = match &settings.geoip {
        Some(path) => Box::new(MaxMindLookup::open(path)?),
        None => {
            info!("geo database disabled");
            Box::new(NoGeo)
        }
    };
    let mut geo = GeoCache::new(lookup);

    // ─── 5) pick files ───────────────────────────────────────────────
    let files = if cli.files.is_empty() {
        find_log_files(&cli.dir, &cli.mask, cli.limit)?
    } else {
        cli.files.clone()
    };
    if files.is_empty() {
        info!(dir = %cli.dir.display(), mask = %cli.mask, "no log files; exit");
        return Ok(true);
    }

    // ─── 6) load ─────────────────────────────────────────────────────
    let summary = process_files(&mut store, &pipeline, &mut geo, &files, settings.keep_source);
    Ok(summary.all_committed())
}
