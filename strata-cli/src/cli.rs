//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Strata CLI - Versioned database migrations
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Strata CLI - Versioned database migrations", long_about = None)]
pub struct Cli {
    /// Options shared by every command
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to the configuration file (defaults to ./strata.toml when present)
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database connection URL, overriding the configuration file
    #[arg(short, long, global = true, env = "STRATA_URL")]
    pub url: Option<String>,

    /// Environment whose overrides to apply
    #[arg(short, long, global = true, env = "STRATA_ENV")]
    pub env: Option<String>,

    /// Migration location, repeatable (e.g. db/migrations or filesystem:sql)
    #[arg(short, long = "location", global = true)]
    pub locations: Vec<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending migrations
    Migrate(MigrateArgs),

    /// Show the state of every migration
    Info(InfoArgs),

    /// Check applied migrations against the resolved ones
    Validate,

    /// Mark an existing database as migrated up to a version
    Baseline(BaselineArgs),

    /// Remove failed migrations and realign checksums in the schema history
    Repair,

    /// Display version information
    Version,
}

/// Arguments for the `migrate` command
#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Highest version to apply (default: latest)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Apply migrations older than the current version
    #[arg(long)]
    pub out_of_order: bool,

    /// Apply every pending migration in a single transaction
    #[arg(long)]
    pub group: bool,
}

/// Arguments for the `info` command
#[derive(Args, Debug, Default)]
pub struct InfoArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `baseline` command
#[derive(Args, Debug, Default)]
pub struct BaselineArgs {
    /// Version to baseline at (default: from configuration)
    #[arg(long)]
    pub version: Option<String>,

    /// Description of the baseline marker
    #[arg(short, long)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_migrate_with_globals() {
        let cli = Cli::try_parse_from([
            "strata",
            "migrate",
            "--target",
            "2.1",
            "--group",
            "--url",
            "sqlite::memory:",
            "-l",
            "db/a",
            "-l",
            "db/b",
        ])
        .unwrap();

        assert_eq!(cli.global.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(cli.global.locations, vec!["db/a", "db/b"]);
        match cli.command {
            Command::Migrate(args) => {
                assert_eq!(args.target.as_deref(), Some("2.1"));
                assert!(args.group);
                assert!(!args.out_of_order);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_baseline_version() {
        let cli = Cli::try_parse_from(["strata", "baseline", "--version", "5", "-d", "legacy"])
            .unwrap();
        match cli.command {
            Command::Baseline(args) => {
                assert_eq!(args.version.as_deref(), Some("5"));
                assert_eq!(args.description.as_deref(), Some("legacy"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
