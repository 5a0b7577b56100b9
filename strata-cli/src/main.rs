//! Strata CLI - Command-line interface for Strata migrations.

use clap::Parser;

use strata_cli::cli::{Cli, Command};
use strata_cli::commands;
use strata_cli::error::CliResult;
use strata_cli::{logging, output};

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Migrate(args) => commands::migrate::run(&cli.global, args).await,
        Command::Info(args) => commands::info::run(&cli.global, args).await,
        Command::Validate => commands::validate::run(&cli.global).await,
        Command::Baseline(args) => commands::baseline::run(&cli.global, args).await,
        Command::Repair => commands::repair::run(&cli.global).await,
        Command::Version => commands::version::run().await,
    }
}
