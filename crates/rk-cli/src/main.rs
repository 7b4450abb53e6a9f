//! Rekon CLI - reconcile SQL and YAML artifacts into an OLAP catalog

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::Cli;
use commands::common::ExitCode;
use commands::{catalog, files, reconcile};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<ExitCode>() {
            Some(code) => std::process::ExitCode::from(code.0),
            None => {
                eprintln!("Error: {err:#}");
                std::process::ExitCode::FAILURE
            }
        },
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        cli::Commands::Reconcile(args) => reconcile::execute(args, &cli.global).await,
        cli::Commands::Put(args) => files::put(args, &cli.global).await,
        cli::Commands::Rm(args) => files::rm(args, &cli.global).await,
        cli::Commands::Mv(args) => files::mv(args, &cli.global).await,
        cli::Commands::Refresh(args) => files::refresh(args, &cli.global).await,
        cli::Commands::Catalog(args) => catalog::execute(args, &cli.global).await,
    }
}
