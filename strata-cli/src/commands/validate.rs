//! `strata validate` - check applied migrations against the resolved ones.

use crate::cli::GlobalArgs;
use crate::commands::Settings;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the validate command
pub async fn run(global: &GlobalArgs) -> CliResult<()> {
    output::header("Validate");

    let settings = Settings::resolve(global)?;
    settings.print();

    let engine = settings.engine().await?;
    engine.validate().await?;

    let pending = engine.info().await?.pending().len();
    success("Successfully validated migrations");
    if pending > 0 {
        output::info(&format!("{} migration(s) pending", pending));
    }
    Ok(())
}
