//! CLI command implementations.

pub mod baseline;
pub mod info;
pub mod migrate;
pub mod repair;
pub mod validate;
pub mod version;

use strata_migrate::{Location, MigrationConfig, MigrationEngine};
use strata_sqlite::{SqliteConfig, connect, migration_engine};

use crate::cli::GlobalArgs;
use crate::config::{CONFIG_FILE_NAME, ConfigLoader};
use crate::error::{CliError, CliResult};
use crate::output;

/// Resolved settings for one command invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database URL after flag overrides and `${VAR}` expansion.
    pub url: String,
    /// Engine configuration after flag overrides.
    pub migrations: MigrationConfig,
}

impl Settings {
    /// Merge the configuration file, the selected environment and command-line flags.
    pub fn resolve(global: &GlobalArgs) -> CliResult<Self> {
        let mut loader = ConfigLoader::load(global.config.as_deref())?;
        let config = loader.resolve(global.env.as_deref())?;

        let url = match &global.url {
            Some(url) => crate::config::expand_env(url)?,
            None => config.database_url()?.ok_or_else(|| {
                CliError::Config(format!(
                    "no database url configured: set [database] url in {} or pass --url",
                    CONFIG_FILE_NAME
                ))
            })?,
        };

        let mut migrations = config.migrations.clone();
        if !global.locations.is_empty() {
            let locations = global
                .locations
                .iter()
                .map(String::as_str)
                .map(Location::parse)
                .collect::<Result<Vec<_>, _>>()?;
            migrations = migrations.locations(locations);
        }

        Ok(Self { url, migrations })
    }

    /// Connect to the database and build the engine.
    pub async fn engine(&self) -> CliResult<MigrationEngine> {
        let sqlite = SqliteConfig::from_url(&self.url).map_err(strata_migrate::MigrationError::from)?;
        let conn = connect(&sqlite, &self.migrations.connect_retry).await?;
        Ok(migration_engine(self.migrations.clone(), conn))
    }

    /// Print where this invocation points.
    pub fn print(&self) {
        output::kv("Database", &self.url);
        let locations = self
            .migrations
            .locations
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        output::kv("Locations", &locations);
        output::kv("History table", &self.migrations.table);
        output::newline();
    }
}
