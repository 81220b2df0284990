use anyhow::{Context, Result};
use clap::Parser;
use factload::{
    config::{load_mapping_file, profile_for},
    geo::{GeoCache, GeoLookup, MaxMindLookup, NoGeo},
    mapping::{FanOutPolicy, MapOutcome, Mapper, SamplingSpec},
    session::Pipeline,
};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// Map log lines from stdin to facts and print them as JSON, one per line.
#[derive(Parser, Debug)]
#[command(name = "inspect_line", version)]
struct Args {
    /// Mapping table as YAML (`{from, to, type, mandatory}` rows).
    #[arg(long, value_name = "YAML")]
    mappings: PathBuf,

    #[arg(short = 't', long = "type", default_value = "metric_events")]
    data_type: String,

    /// GeoIP2/GeoLite2 City database; geo fields stay empty without it.
    #[arg(long)]
    geoip: Option<PathBuf>,

    #[arg(short = 's', long)]
    sampling: Option<SamplingSpec>,

    #[arg(long)]
    fan_out: Option<FanOutPolicy>,
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let profile = profile_for(&args.data_type)
        .with_context(|| format!("unknown data type `{}`", args.data_type))?;

    let rows = load_mapping_file(&args.mappings)?;
    let mapper = Mapper::new(
        &rows,
        args.sampling.unwrap_or(profile.sampling),
        args.fan_out.unwrap_or(profile.fan_out),
    )?;
    let pipeline = Pipeline::new(args.data_type.as_str(), profile.format, mapper);

    let lookup: Box<dyn GeoLookup> = match &args.geoip {
        Some(path) => Box::new(MaxMindLookup::open(path)?),
        None => Box::new(NoGeo),
    };
    let mut geo = GeoCache::new(lookup);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (i, line) in io::stdin().lock().lines().enumerate() {
        let line = line.context("reading stdin")?;
        let row = i + 1;
        let report = match pipeline.process_line(line.trim(), &mut geo) {
            Ok(MapOutcome::Fact(fact)) => json!({ "row": row, "fact": fact }),
            Ok(MapOutcome::Dropped) => json!({ "row": row, "dropped": true }),
            Err(e) => json!({ "row": row, "error": e.to_string() }),
        };
        writeln!(out, "{report}")?;
    }
    Ok(())
}
