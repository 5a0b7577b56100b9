//! `strata repair` - remove failed migrations and realign checksums in the schema history.

use crate::cli::GlobalArgs;
use crate::commands::Settings;
use crate::error::CliResult;
use crate::output::{self, success};

/// Run the repair command
pub async fn run(global: &GlobalArgs) -> CliResult<()> {
    output::header("Repair");

    let settings = Settings::resolve(global)?;
    settings.print();

    let report = settings.engine().await?.repair().await?;
    if report.is_empty() {
        success("Schema history needs no repair.");
        return Ok(());
    }

    if report.removed_failed > 0 {
        success(&format!(
            "Removed {} failed migration(s) from the schema history.",
            report.removed_failed
        ));
    }
    if !report.aligned.is_empty() {
        success(&format!(
            "Aligned checksums of {} migration(s) with the local scripts.",
            report.aligned.len()
        ));
        for version in &report.aligned {
            output::list_item(version);
        }
    }
    Ok(())
}
