mod charts;
mod cli;
mod error;
mod export;
mod gateway;
mod health;
mod logging;
mod model;
mod orchestrator;
mod session;
mod text_summary;
mod workflow;

#[cfg(test)]
mod test_utils;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init_logging(args.verbose)?;
    cli::run(args).await
}
