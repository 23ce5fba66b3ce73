use anyhow::Result;
use blendrelay::{cli, logging};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init(args.log_level)?;
    cli::run(args).await
}
