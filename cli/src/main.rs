use anyhow::Result;
use clap::Parser;

mod args;
mod run;
mod simulator;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    fleetctl_common::init();
    tracing_subscriber::fmt::init();
    fleetctl_common::metrics::install_recorder();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let cancel_task = tokio::spawn(fleetctl_common::shutdown::shutdown_signal());
            tokio::select! {
                result = run::run(args) => result,
                _ = cancel_task => {
                    tracing::warn!("shutdown signal received before action completed");
                    Ok(())
                }
            }
        }
    }
}
