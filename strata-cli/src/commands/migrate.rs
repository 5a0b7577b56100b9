//! `strata migrate` - apply pending migrations.

use strata_migrate::{MigrationResult, VersionKey};

use crate::cli::{GlobalArgs, MigrateArgs};
use crate::commands::Settings;
use crate::error::CliResult;
use crate::output::{self, success, warn};

/// Run the migrate command
pub async fn run(global: &GlobalArgs, args: MigrateArgs) -> CliResult<()> {
    output::header("Migrate");

    let mut settings = Settings::resolve(global)?;
    if let Some(target) = &args.target {
        settings.migrations = settings.migrations.target(VersionKey::parse(target)?);
    }
    if args.out_of_order {
        settings.migrations = settings.migrations.out_of_order(true);
    }
    if args.group {
        settings.migrations = settings.migrations.group(true);
    }
    settings.print();

    let engine = settings.engine().await?;

    // Ctrl-C stops the run between migrations; the one in flight finishes.
    let token = engine.cancellation_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current migration");
            token.cancel();
        }
    });

    let result = engine.migrate().await;
    watcher.abort();
    report(&result?);
    Ok(())
}

fn report(result: &MigrationResult) {
    for applied in &result.applied_migrations {
        let version = applied
            .version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<< repeatable >>".to_string());
        output::list_item(&format!(
            "{} - {} ({} ms)",
            version, applied.description, applied.execution_time_ms
        ));
    }
    if !result.applied_migrations.is_empty() {
        output::newline();
    }

    for warning in &result.warnings {
        warn(warning);
    }

    if result.cancelled {
        warn("Migration was interrupted; remaining migrations were not applied.");
    }

    if let Some(version) = &result.target_version {
        output::kv("Schema version", &version.to_string());
    }
    success(&result.summary());
}
