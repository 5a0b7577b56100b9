//! Database collaborator contracts.
//!
//! The engine never talks to a driver directly. A dialect crate provides a
//! [`DbSupport`] describing the database's capabilities, and connections that
//! implement [`SqlExecutor`] and [`TransactionalConnection`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::MigrateResult;

/// A result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Executes SQL.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str) -> MigrateResult<u64>;

    /// Execute a statement with positional parameters (`?1`, `?2`, ...).
    async fn execute_with(&self, sql: &str, params: &[Value]) -> MigrateResult<u64>;

    /// Run a query and collect every row.
    async fn query(&self, sql: &str) -> MigrateResult<Vec<Row>>;
}

/// A connection with explicit transaction control.
///
/// `begin` may be called while a transaction is already open; implementations
/// nest with savepoints.
#[async_trait]
pub trait TransactionalConnection: SqlExecutor {
    /// Open a transaction or a nested savepoint.
    async fn begin(&self) -> MigrateResult<()>;

    /// Commit the innermost open transaction.
    async fn commit(&self) -> MigrateResult<()>;

    /// Roll back the innermost open transaction.
    async fn rollback(&self) -> MigrateResult<()>;

    /// Borrow as a plain executor.
    fn as_executor(&self) -> &dyn SqlExecutor;
}

/// Dialect capabilities.
#[async_trait]
pub trait DbSupport: Send + Sync {
    /// Database product name.
    fn name(&self) -> &str;

    /// Whether DDL statements participate in transactions.
    ///
    /// Decides how a failed migration is recorded: with DDL transactions the
    /// failure is rolled back and nothing is written to the schema history.
    fn supports_ddl_transactions(&self) -> bool;

    /// Quote a (possibly qualified) identifier.
    fn quote(&self, parts: &[&str]) -> String;

    /// Schema the connection currently works in.
    async fn current_schema(&self, conn: &dyn SqlExecutor) -> MigrateResult<String>;

    /// User the connection is authenticated as.
    async fn current_user(&self, conn: &dyn SqlExecutor) -> MigrateResult<String>;
}

/// Quote each part with `quote` as both delimiters and join with dots, doubling
/// embedded quote characters.
pub fn quote_with(quote: char, parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| {
            let escaped = part.replace(quote, &format!("{}{}", quote, quote));
            format!("{}{}{}", quote, escaped, quote)
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Read a column as text, accepting numbers as well.
pub fn row_str(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a column as an integer.
pub fn row_i64(row: &Row, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
