//! Schema history tracking.
//!
//! The schema history (ledger) is a table inside the target database with one
//! row per migration attempt. All writes happen through a
//! [`LedgerTransaction`], which holds the exclusive lock for its lifetime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::migration::MigrationKind;
use crate::retry::RetryPolicy;
use crate::version::VersionKey;

/// A row of the schema history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Monotonic rank, assigned at insert time.
    pub installed_rank: i32,
    /// Version, or `None` for a repeatable migration.
    pub version: Option<VersionKey>,
    /// Description at the time of application.
    pub description: String,
    /// Kind of migration.
    pub kind: MigrationKind,
    /// Script identity.
    pub script: String,
    /// Checksum at the time of application.
    pub checksum: Option<i32>,
    /// Database user that applied it.
    pub installed_by: String,
    /// When it was applied.
    pub installed_on: DateTime<Utc>,
    /// Execution time in milliseconds.
    pub execution_time_ms: i32,
    /// Whether it succeeded.
    pub success: bool,
}

impl AppliedMigration {
    /// Whether this row is the baseline marker.
    pub fn is_baseline(&self) -> bool {
        self.kind == MigrationKind::Baseline
    }

    /// Whether this row belongs to a versioned migration.
    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }
}

/// A row to be appended. The ledger assigns rank and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAppliedMigration {
    /// Version, or `None` for a repeatable migration.
    pub version: Option<VersionKey>,
    /// Description.
    pub description: String,
    /// Kind.
    pub kind: MigrationKind,
    /// Script identity.
    pub script: String,
    /// Checksum.
    pub checksum: Option<i32>,
    /// Applying user.
    pub installed_by: String,
    /// Execution time in milliseconds.
    pub execution_time_ms: i32,
    /// Outcome.
    pub success: bool,
}

/// Durable record of what has run.
#[async_trait]
pub trait HistoryLedger: Send + Sync {
    /// Name of the backing table.
    fn table(&self) -> &str;

    /// Whether the backing table exists.
    async fn exists(&self) -> MigrateResult<bool>;

    /// Create the backing table if needed.
    async fn initialize(&self) -> MigrateResult<()>;

    /// Unlocked read of every row, ordered by installed rank.
    ///
    /// Returns an empty list when the table does not exist.
    async fn applied_migrations(&self) -> MigrateResult<Vec<AppliedMigration>>;

    /// Try once to take the exclusive lock.
    ///
    /// `Ok(None)` means another holder has it.
    async fn try_lock(&self) -> MigrateResult<Option<Box<dyn LedgerTransaction>>>;
}

/// A locked transaction on the schema history.
///
/// Dropping without `commit` or `rollback` releases the lock and discards writes.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Every row, ordered by installed rank, including uncommitted appends.
    async fn applied_migrations(&mut self) -> MigrateResult<Vec<AppliedMigration>>;

    /// Append a row, returning it with rank and timestamp filled in.
    async fn append(&mut self, row: NewAppliedMigration) -> MigrateResult<AppliedMigration>;

    /// Delete every failed row, returning how many were removed.
    async fn remove_failed(&mut self) -> MigrateResult<usize>;

    /// Overwrite the checksum, description and type of the row at `installed_rank`.
    ///
    /// Used by repair to accept edited scripts as the new truth.
    async fn update_checksum(
        &mut self,
        installed_rank: i32,
        checksum: Option<i32>,
        description: &str,
        kind: MigrationKind,
    ) -> MigrateResult<()>;

    /// Commit and release the lock.
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Roll back and release the lock.
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// Take the ledger lock, retrying with `policy`.
pub async fn acquire_lock(
    ledger: &dyn HistoryLedger,
    policy: &RetryPolicy,
) -> MigrateResult<Box<dyn LedgerTransaction>> {
    let outcome = policy
        .run(|attempt| async move {
            let lock = ledger.try_lock().await?;
            if lock.is_none() {
                tracing::debug!(table = ledger.table(), attempt, "schema history is locked");
            }
            Ok::<_, MigrationError>(lock)
        })
        .await?;

    outcome.map_err(|exhausted| MigrationError::LockTimeout {
        table: ledger.table().to_string(),
        attempts: exhausted.attempts,
        waited: exhausted.waited,
    })
}

/// Highest version among successful or failed versioned rows.
pub fn current_version(rows: &[AppliedMigration]) -> VersionKey {
    rows.iter()
        .filter_map(|r| r.version.clone())
        .max()
        .unwrap_or(VersionKey::EMPTY)
}

/// The baseline row, if any.
pub fn baseline_row(rows: &[AppliedMigration]) -> Option<&AppliedMigration> {
    rows.iter().find(|r| r.is_baseline())
}

/// Ledger DDL shared by SQL dialects.
pub fn create_table_sql(quoted_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    \
             installed_rank INTEGER NOT NULL PRIMARY KEY,\n    \
             version TEXT NULL,\n    \
             description TEXT NOT NULL,\n    \
             type TEXT NOT NULL,\n    \
             script TEXT NOT NULL,\n    \
             checksum INTEGER NULL,\n    \
             installed_by TEXT NOT NULL,\n    \
             installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,\n    \
             execution_time INTEGER NOT NULL,\n    \
             success BOOLEAN NOT NULL\n\
         )",
        table = quoted_table
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(rank: i32, version: Option<&str>, kind: MigrationKind) -> AppliedMigration {
        AppliedMigration {
            installed_rank: rank,
            version: version.map(|v| VersionKey::parse(v).unwrap()),
            description: "d".to_string(),
            kind,
            script: "s".to_string(),
            checksum: None,
            installed_by: "tester".to_string(),
            installed_on: Utc::now(),
            execution_time_ms: 5,
            success: true,
        }
    }

    #[test]
    fn test_current_version() {
        assert!(current_version(&[]).is_empty());
        let rows = vec![
            row(1, Some("1"), MigrationKind::Script),
            row(2, Some("3"), MigrationKind::Script),
            row(3, None, MigrationKind::Script),
            row(4, Some("2"), MigrationKind::Script),
        ];
        assert_eq!(current_version(&rows), VersionKey::parse("3").unwrap());
    }

    #[test]
    fn test_baseline_row() {
        let rows = vec![
            row(1, Some("5"), MigrationKind::Baseline),
            row(2, Some("6"), MigrationKind::Script),
        ];
        assert_eq!(baseline_row(&rows).map(|r| r.installed_rank), Some(1));
        assert!(rows[0].is_baseline());
        assert!(!rows[1].is_baseline());
    }

    #[test]
    fn test_create_table_sql_has_stable_layout() {
        let sql = create_table_sql("\"strata_schema_history\"");
        for column in [
            "installed_rank",
            "version",
            "description",
            "type",
            "script",
            "checksum",
            "installed_by",
            "installed_on",
            "execution_time",
            "success",
        ] {
            assert!(sql.contains(column), "missing column {column}");
        }
    }
}
