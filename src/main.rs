mod cli;
mod commands;
mod common;
mod config;
mod engine;
mod merge;
mod ui;

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::config::MergeConfig;
use crate::ui::prelude::*;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::init(cli.output, !cli.no_color && std::io::stdout().is_terminal());
    ui::set_debug_mode(cli.debug);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            emit(Level::Error, "musicmerge.error", &format!("Error: {err:#}"), None);
            commands::EXIT_FAILURE
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = MergeConfig::load()?;

    match cli.command {
        Commands::Merge(args) => commands::handle_merge(args, &config).await,
        Commands::Engine(args) => commands::handle_engine(args, &config),
        Commands::Config => commands::handle_config(&config),
    }
}
