//! `strata info` - show the state of every migration.

use serde::Serialize;
use strata_migrate::{InfoReport, ReconciledEntry};

use crate::cli::{GlobalArgs, InfoArgs};
use crate::commands::Settings;
use crate::error::{CliError, CliResult};
use crate::output;

/// One migration as printed by `info --json`.
#[derive(Debug, Serialize)]
pub struct InfoRow {
    /// `Versioned`, `Repeatable` or `Baseline`.
    pub category: &'static str,
    /// Version, empty for repeatables.
    pub version: String,
    /// Description.
    pub description: String,
    /// Migration type.
    pub kind: String,
    /// Script identity.
    pub script: String,
    /// When it was applied.
    pub installed_on: Option<String>,
    /// Derived state.
    pub state: String,
    /// Why the state was derived, when it needs explaining.
    pub diagnostic: Option<String>,
}

impl From<&ReconciledEntry> for InfoRow {
    fn from(entry: &ReconciledEntry) -> Self {
        let category = match entry.kind() {
            Some(strata_migrate::MigrationKind::Baseline) => "Baseline",
            _ if entry.is_repeatable() => "Repeatable",
            _ => "Versioned",
        };
        Self {
            category,
            version: entry.version().map(|v| v.to_string()).unwrap_or_default(),
            description: entry.description().to_string(),
            kind: entry.kind().map(|k| k.to_string()).unwrap_or_default(),
            script: entry.script().to_string(),
            installed_on: entry
                .applied
                .as_ref()
                .map(|a| a.installed_on.format("%Y-%m-%d %H:%M:%S").to_string()),
            state: entry.state.display_name().to_string(),
            diagnostic: entry.diagnostic.clone(),
        }
    }
}

/// Run the info command
pub async fn run(global: &GlobalArgs, args: InfoArgs) -> CliResult<()> {
    let settings = Settings::resolve(global)?;
    let report = settings.engine().await?.info().await?;

    if args.json {
        let rows: Vec<InfoRow> = report.all().iter().map(InfoRow::from).collect();
        let json = serde_json::to_string_pretty(&rows)
            .map_err(|e| CliError::Command(format!("failed to serialize report: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    output::header("Info");
    settings.print();
    print_report(&report);
    Ok(())
}

fn print_report(report: &InfoReport) {
    match report.current().and_then(|e| e.version()) {
        Some(version) => output::kv("Schema version", &version.to_string()),
        None => output::kv("Schema version", "<< Empty Schema >>"),
    }
    output::newline();

    if report.all().is_empty() {
        output::info("No migrations found.");
        return;
    }

    let rows: Vec<Vec<String>> = report
        .all()
        .iter()
        .map(|entry| {
            let row = InfoRow::from(entry);
            vec![
                row.category.to_string(),
                row.version,
                row.description,
                row.kind,
                row.installed_on.unwrap_or_default(),
                output::style_state(entry.state),
            ]
        })
        .collect();
    output::table(
        &["Category", "Version", "Description", "Type", "Installed On", "State"],
        &rows,
    );

    for entry in report.all() {
        if let Some(diagnostic) = &entry.diagnostic {
            output::dim(&format!("{}: {}", entry.script(), diagnostic));
        }
    }

    output::newline();
    output::kv("Pending", &report.pending().len().to_string());
    let failed = report.failed().len();
    if failed > 0 {
        output::warn(&format!(
            "{} failed migration(s) recorded; run `strata repair` after fixing them",
            failed
        ));
    }
}
