use anyhow::Result;
use clap::Parser;
use log::info;

use sheetbridge::cli::app::{Cli, Commands};
use sheetbridge::commands;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("starting sheetbridge");

    match &cli.command {
        Commands::Template(args) => commands::template::run(args),
        Commands::Import(args) => commands::import::run(args),
    }
}
