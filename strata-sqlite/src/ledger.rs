//! Schema history table backed by SQLite.
//!
//! The exclusive lock is SQLite's reserved lock, taken with `BEGIN IMMEDIATE`,
//! which keeps other processes out. Tasks in this process that share the
//! connection are kept out by an async mutex held alongside it.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use strata_migrate::dialect::{row_i64, row_str};
use strata_migrate::history::create_table_sql;
use strata_migrate::{
    AppliedMigration, DbSupport, HistoryLedger, LedgerTransaction, MigrateResult, MigrationError,
    MigrationKind, NewAppliedMigration, Row, VersionKey,
};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::connection::SqliteConnection;
use crate::support::SqliteSupport;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const COLUMNS: &str = "installed_rank, version, description, type, script, checksum, \
                       installed_by, installed_on, execution_time, success";

/// The schema history table on a SQLite connection.
///
/// Shares the connection with the migrations it records, so history rows and
/// migration changes commit together.
#[derive(Debug, Clone)]
pub struct SqliteHistoryLedger {
    conn: SqliteConnection,
    table: String,
    quoted: String,
}

impl SqliteHistoryLedger {
    /// Create a ledger for `table` on `conn`.
    pub fn new(conn: SqliteConnection, table: impl Into<String>) -> Self {
        let table = table.into();
        let quoted = SqliteSupport::new().quote(&[&table]);
        Self {
            conn,
            table,
            quoted,
        }
    }
}

#[async_trait]
impl HistoryLedger for SqliteHistoryLedger {
    fn table(&self) -> &str {
        &self.table
    }

    async fn exists(&self) -> MigrateResult<bool> {
        let rows = self
            .conn
            .query_params(
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?1",
                vec![Value::Text(self.table.clone())],
            )
            .await?;
        Ok(rows.first().and_then(|r| row_i64(r, "n")).unwrap_or(0) > 0)
    }

    async fn initialize(&self) -> MigrateResult<()> {
        if self.exists().await? {
            return Ok(());
        }
        self.conn
            .execute_params(&create_table_sql(&self.quoted), Vec::new())
            .await?;
        self.conn
            .execute_params(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} (success)",
                    SqliteSupport::new().quote(&[&format!("{}_s_idx", self.table)]),
                    self.quoted
                ),
                Vec::new(),
            )
            .await?;
        debug!(table = %self.table, "created schema history table");
        Ok(())
    }

    async fn applied_migrations(&self) -> MigrateResult<Vec<AppliedMigration>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        read_rows(&self.conn, &self.quoted).await
    }

    async fn try_lock(&self) -> MigrateResult<Option<Box<dyn LedgerTransaction>>> {
        let Ok(guard) = self.conn.ledger_lock().try_lock_owned() else {
            return Ok(None);
        };

        if self.conn.transaction_depth() > 0 {
            warn!(table = %self.table, "rolling back a transaction left open by a previous lock holder");
            self.conn.reset().await?;
        }

        if !self.conn.begin_immediate().await? {
            return Ok(None);
        }

        Ok(Some(Box::new(SqliteLedgerTransaction {
            conn: self.conn.clone(),
            quoted: self.quoted.clone(),
            _guard: guard,
        })))
    }
}

struct SqliteLedgerTransaction {
    conn: SqliteConnection,
    quoted: String,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl LedgerTransaction for SqliteLedgerTransaction {
    async fn applied_migrations(&mut self) -> MigrateResult<Vec<AppliedMigration>> {
        read_rows(&self.conn, &self.quoted).await
    }

    async fn append(&mut self, row: NewAppliedMigration) -> MigrateResult<AppliedMigration> {
        let next = self
            .conn
            .query_params(
                &format!(
                    "SELECT COALESCE(MAX(installed_rank), 0) + 1 AS next FROM {}",
                    self.quoted
                ),
                Vec::new(),
            )
            .await?;
        let rank = next
            .first()
            .and_then(|r| row_i64(r, "next"))
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| MigrationError::database("unable to allocate an installed rank"))?;

        let stamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let installed_on = parse_timestamp(&stamp)?;

        self.conn
            .execute_params(
                &format!(
                    "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    self.quoted, COLUMNS
                ),
                vec![
                    Value::Integer(i64::from(rank)),
                    row.version
                        .as_ref()
                        .and_then(|v| v.as_text())
                        .map_or(Value::Null, |v| Value::Text(v.to_string())),
                    Value::Text(row.description.clone()),
                    Value::Text(row.kind.as_str().to_string()),
                    Value::Text(row.script.clone()),
                    row.checksum.map_or(Value::Null, |c| Value::Integer(i64::from(c))),
                    Value::Text(row.installed_by.clone()),
                    Value::Text(stamp),
                    Value::Integer(i64::from(row.execution_time_ms)),
                    Value::Integer(i64::from(row.success)),
                ],
            )
            .await?;

        Ok(AppliedMigration {
            installed_rank: rank,
            version: row.version,
            description: row.description,
            kind: row.kind,
            script: row.script,
            checksum: row.checksum,
            installed_by: row.installed_by,
            installed_on,
            execution_time_ms: row.execution_time_ms,
            success: row.success,
        })
    }

    async fn remove_failed(&mut self) -> MigrateResult<usize> {
        let removed = self
            .conn
            .execute_params(&format!("DELETE FROM {} WHERE success = 0", self.quoted), Vec::new())
            .await?;
        Ok(removed as usize)
    }

    async fn update_checksum(
        &mut self,
        installed_rank: i32,
        checksum: Option<i32>,
        description: &str,
        kind: MigrationKind,
    ) -> MigrateResult<()> {
        let updated = self
            .conn
            .execute_params(
                &format!(
                    "UPDATE {} SET checksum = ?1, description = ?2, type = ?3 WHERE installed_rank = ?4",
                    self.quoted
                ),
                vec![
                    checksum.map_or(Value::Null, |c| Value::Integer(i64::from(c))),
                    Value::Text(description.to_string()),
                    Value::Text(kind.as_str().to_string()),
                    Value::Integer(i64::from(installed_rank)),
                ],
            )
            .await?;
        if updated == 0 {
            return Err(MigrationError::database(format!(
                "no schema history row with rank {} in {}",
                installed_rank, self.quoted
            )));
        }
        debug!(rank = installed_rank, "updated schema history checksum");
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        Ok(self.conn.commit_lock().await?)
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        Ok(self.conn.rollback_lock().await?)
    }
}

async fn read_rows(conn: &SqliteConnection, quoted: &str) -> MigrateResult<Vec<AppliedMigration>> {
    let rows = conn
        .query_params(
            &format!("SELECT {} FROM {} ORDER BY installed_rank", COLUMNS, quoted),
            Vec::new(),
        )
        .await?;
    rows.iter().map(parse_row).collect()
}

fn parse_row(row: &Row) -> MigrateResult<AppliedMigration> {
    let column = |name: &str| {
        row_str(row, name)
            .ok_or_else(|| MigrationError::database(format!("schema history row is missing {}", name)))
    };
    let int = |name: &str| {
        row_i64(row, name)
            .ok_or_else(|| MigrationError::database(format!("schema history row is missing {}", name)))
    };
    let to_i32 = |name: &str, value: i64| {
        i32::try_from(value)
            .map_err(|_| MigrationError::database(format!("{} out of range: {}", name, value)))
    };

    Ok(AppliedMigration {
        installed_rank: to_i32("installed_rank", int("installed_rank")?)?,
        version: row_str(row, "version").map(|v| VersionKey::parse(&v)).transpose()?,
        description: column("description")?,
        kind: column("type")?.parse::<MigrationKind>()?,
        script: column("script")?,
        checksum: row_i64(row, "checksum")
            .map(|c| to_i32("checksum", c))
            .transpose()?,
        installed_by: column("installed_by")?,
        installed_on: parse_timestamp(&column("installed_on")?)?,
        execution_time_ms: to_i32("execution_time", int("execution_time")?)?,
        success: int("success")? != 0,
    })
}

fn parse_timestamp(text: &str) -> MigrateResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| MigrationError::database(format!("invalid installed_on '{}': {}", text, e)))
}
