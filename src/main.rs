//! Scenario CLI - record/replay scenario tests for backup management
//!
//! Runs scenario scripts against recorded or live service traffic and
//! inspects script manifests and fixtures.

use std::path::PathBuf;

use backup_scenarios::{cli, common::logging, commands::Commands};
use clap::Parser;

#[derive(Parser)]
#[command(name = "scenario", about = "Record/replay scenario test harness")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_cli(cli.verbose);

    if let Err(e) = cli::dispatch(cli.command, cli.config.as_deref(), cli.verbose).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
