mod commands;
mod config;
mod logging;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser};
use logging::init_logging;

#[derive(clap::Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "bastion.yaml", env = "BASTION_CONFIG")]
    config: PathBuf,

    /// Raise log verbosity
    #[clap(long, short, action = ArgAction::Count)]
    debug: u8,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the gateway
    Run,
    /// Validate config file
    Check,
    /// Create the SSH host key if it does not exist yet
    GenerateHostKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    match &cli.command {
        Commands::Run => crate::commands::run::command(&cli).await,
        Commands::Check => crate::commands::check::command(&cli).await,
        Commands::GenerateHostKey => crate::commands::generate_host_key::command(&cli).await,
    }
}
