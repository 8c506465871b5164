use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

use config::ConfigLoader;

#[derive(Parser)]
#[command(name = "netgauge", about = "Network speed tests with fallback providers")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read only this config file instead of the user and project layers
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a speed test
    Run(commands::run::RunArgs),
    /// List stored results
    Results(commands::results::ResultsArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => ConfigLoader::load()?,
    };

    let mut observe = config.log.clone();
    if cli.verbose {
        observe = observe.with_filter("netgauge_core=debug,netgauge_cli=debug,info");
    }
    let logs = netgauge_observe::init(&observe)?;

    match cli.command {
        Commands::Run(args) => commands::run::run(args, config, logs).await,
        Commands::Results(args) => commands::results::run(args, &config).await,
        Commands::Config(args) => commands::config::run(args, &config),
    }
}
