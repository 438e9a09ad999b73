use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use humansize::{format_size, DECIMAL};

use duffel::config::Config;
use duffel::store::S3Store;
use duffel::sync::{SyncEngine, TransferOutcome};

#[derive(Parser)]
#[command(
    name = "duffel",
    about = "Sync a session workspace against object storage",
    version
)]
struct Cli {
    /// Remote bucket (overrides config file and environment)
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Remote key prefix
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Local working directory (defaults to the current directory)
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    /// Store region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom S3-compatible endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Print the outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the remote prefix into the working directory
    Pull,
    /// Upload new and changed files back to the remote prefix
    Push,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if cli.bucket.is_some() {
        config.bucket = cli.bucket.clone();
    }
    if cli.prefix.is_some() {
        config.prefix = cli.prefix.clone();
    }
    if cli.workdir.is_some() {
        config.workdir = cli.workdir.clone();
    }
    if cli.region.is_some() {
        config.region = cli.region.clone();
    }
    if cli.endpoint.is_some() {
        config.endpoint = cli.endpoint.clone();
    }

    let workdir = match config.workdir.clone() {
        Some(workdir) => workdir,
        None => std::env::current_dir()?,
    };
    let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());

    let mut store = S3Store::new(&region);
    if let Some(endpoint) = &config.endpoint {
        store = store.with_endpoint(endpoint);
    }

    let engine = SyncEngine::new(Arc::new(store), workdir, config.remote());

    let outcome = match cli.command {
        Command::Pull => {
            engine.start_pull();
            let Some(outcome) = engine.wait_for_pull().await else {
                anyhow::bail!("pull did not start");
            };
            outcome
        }
        Command::Push => engine.push().await,
    };

    report(&outcome, cli.json)?;
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

fn report(outcome: &TransferOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    let status = if outcome.success {
        "ok".green()
    } else {
        "failed".red()
    };
    println!(
        "{} {} files, {} in {} ms",
        status,
        outcome.files_transferred,
        format_size(outcome.bytes_transferred, DECIMAL),
        outcome.duration_ms
    );
    for error in &outcome.errors {
        eprintln!("  {} {}", "error:".red(), error);
    }
    Ok(())
}
