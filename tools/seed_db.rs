//! Seeds MongoDB from the static catalog files.
//! Usage: seed_db [--dry-run] [PRIMARY [EXTRA...]]
//! Uses MONGODB_URI and MONGODB_DB from the environment (.env supported).

use anyhow::{bail, Result};
use dotenvy::dotenv;
use moviedb::config::MongoConfig;
use moviedb::seed::{self, SeedSummary, DEFAULT_EXTRAS, DEFAULT_PRIMARY};
use moviedb::store::MongoStore;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Args {
    dry_run: bool,
    primary: PathBuf,
    extras: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut dry_run = false;
    let mut paths = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "-h" | "--help" => {
                println!("Usage: seed_db [--dry-run] [PRIMARY [EXTRA...]]");
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("Unknown flag {}", flag),
            path => paths.push(PathBuf::from(path)),
        }
    }

    let mut paths = paths.into_iter();
    let primary = paths
        .next()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIMARY));
    let mut extras: Vec<PathBuf> = paths.collect();
    if extras.is_empty() {
        extras = DEFAULT_EXTRAS.iter().map(PathBuf::from).collect();
    }
    Ok(Args {
        dry_run,
        primary,
        extras,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = parse_args()?;
    let snapshot = seed::merge(seed::load_sources(&args.primary, &args.extras)?);

    if args.dry_run {
        println!("Dry run, nothing written: {}", SeedSummary::from(&snapshot));
        return Ok(());
    }

    let mongo = MongoConfig::from_env()?;
    let store = MongoStore::connect(&mongo.uri, &mongo.database).await?;
    let summary = seed::seed_store(&store, snapshot).await?;
    info!("Database seeded successfully");
    println!("Seeded {}", summary);
    Ok(())
}
