//! Batch triage of a differences CSV: `triage-csv <differences.csv>`.
//! Trains from the configured data files and prints `{results, summary}` JSON to stdout.

use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

use valuation_triage::{bootstrap, dataset, EngineConfig};

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: triage-csv <differences.csv>");
    };

    let config = EngineConfig::load().context("loading engine config")?;
    let snapshot = bootstrap(&config)?;
    let records = dataset::load_differences(&path)?;
    let batch = snapshot.analyze_batch(&records)?;

    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}
