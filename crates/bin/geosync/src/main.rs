use anyhow::Result;
use clap::Parser;
use geosync::{
    commands,
    config::{Cli, Command},
};

#[tokio::main]
async fn main() -> Result<()> {
    geosync::logging::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Sync(config) => commands::sync::run(config).await,
    }
}
