mod config;
mod domain;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{DemoConfig, Overrides, Settings};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "txn-demo")]
#[command(about = "Run a randomized saga repeatedly and list every distinct outcome", long_about = None)]
struct Cli {
    /// Number of runs (default: 1000)
    #[arg(long, short = 'n')]
    iterations: Option<usize>,

    /// Seed for the random checks (default: fresh entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Entity id handed to every run (default: 47)
    #[arg(long)]
    entity_id: Option<i64>,

    /// Cancel each run after this many milliseconds
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// TOML file with defaults for the flags above and a [txn] table
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let settings = match resolve_settings(cli) {
        Ok(settings) => settings,
        Err(e) => {
            print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let summary = domain::run(&settings).await;

    println!();
    println!("likely all possible results:");
    for result in &summary.results {
        println!("{result}");
    }
    ExitCode::SUCCESS
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_settings(cli: Cli) -> Result<Settings, CliError> {
    let file = match &cli.config {
        Some(path) => DemoConfig::from_path(path)?,
        None => DemoConfig::default(),
    };
    let overrides = Overrides {
        iterations: cli.iterations,
        seed: cli.seed,
        entity_id: cli.entity_id,
        cancel_after_ms: cli.cancel_after_ms,
    };
    Ok(Settings::resolve(overrides, file))
}

fn print_error(error: &CliError) {
    eprintln!("error: {error}");

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("caused by: {cause}");
        source = std::error::Error::source(cause);
    }
}
