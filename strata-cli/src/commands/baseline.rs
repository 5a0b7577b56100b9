//! `strata baseline` - mark an existing database as migrated up to a version.

use strata_migrate::VersionKey;

use crate::cli::{BaselineArgs, GlobalArgs};
use crate::commands::Settings;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the baseline command
pub async fn run(global: &GlobalArgs, args: BaselineArgs) -> CliResult<()> {
    output::header("Baseline");

    let settings = Settings::resolve(global)?;
    settings.print();

    let version = match &args.version {
        Some(raw) => VersionKey::parse(raw)?,
        None => settings.migrations.baseline_version.clone(),
    };
    let description = args
        .description
        .clone()
        .unwrap_or_else(|| settings.migrations.baseline_description.clone());

    let engine = settings.engine().await?;
    let row = engine.baseline_with(version, description).await?;

    success(&format!(
        "Schema history baselined at version {} ({})",
        row.version.map(|v| v.to_string()).unwrap_or_default(),
        row.description
    ));
    Ok(())
}
