//! SQLite connection wrapper.
//!
//! One [`SqliteConnection`] (and its clones) wraps a single `tokio-rusqlite`
//! handle. Work submitted through it runs in order on the driver's background
//! thread, so the transaction depth kept here always matches the database.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use serde_json::Value as JsonValue;
use strata_migrate::{MigrateResult, Row, SqlExecutor, TransactionalConnection};
use tokio_rusqlite::Connection;
use tracing::{debug, trace};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::{SqliteError, SqliteResult};

/// A wrapper around a SQLite connection with savepoint-based nesting.
#[derive(Clone)]
pub struct SqliteConnection {
    conn: Connection,
    depth: Arc<AtomicUsize>,
    ledger_lock: Arc<tokio::sync::Mutex<()>>,
    path: String,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("depth", &self.transaction_depth())
            .finish()
    }
}

impl SqliteConnection {
    /// Open a connection and apply the configured pragmas.
    pub async fn open(config: &SqliteConfig) -> SqliteResult<Self> {
        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory().await,
            DatabasePath::File(path) => Connection::open(path).await,
        }
        .map_err(|e| SqliteError::connection(format!("{}: {}", config.path_str(), e)))?;

        let init = config.init_sql();
        conn.call(move |conn| Ok(conn.execute_batch(&init)?)).await?;

        debug!(path = config.path_str(), "opened sqlite connection");
        Ok(Self {
            conn,
            depth: Arc::new(AtomicUsize::new(0)),
            ledger_lock: Arc::new(tokio::sync::Mutex::new(())),
            path: config.path_str().to_string(),
        })
    }

    /// Database path this connection was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of open transaction levels (0 when in autocommit mode).
    pub fn transaction_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// In-process half of the schema history lock, shared by every clone.
    pub(crate) fn ledger_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.ledger_lock)
    }

    /// Execute a statement with parameters, returning the number of changed rows.
    ///
    /// Statements that produce rows (`SELECT`, most `PRAGMA`s) are stepped to
    /// completion and report zero.
    pub async fn execute_params(&self, sql: &str, params: Vec<Value>) -> SqliteResult<u64> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing statement");

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let params = rusqlite::params_from_iter(params.iter());
                if stmt.column_count() > 0 {
                    let mut rows = stmt.query(params)?;
                    while rows.next()?.is_some() {}
                    Ok(0)
                } else {
                    Ok(stmt.execute(params)? as u64)
                }
            })
            .await
            .map_err(SqliteError::from)
    }

    /// Run a query with parameters and return all rows keyed by column name.
    pub async fn query_params(&self, sql: &str, params: Vec<Value>) -> SqliteResult<Vec<Row>> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing query");

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();

                let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    let mut map = Row::new();
                    for (i, col) in columns.iter().enumerate() {
                        let value = row.get_ref(i).map(from_sqlite_value).unwrap_or(JsonValue::Null);
                        map.insert(col.clone(), value);
                    }
                    Ok(map)
                })?;

                let results: Result<Vec<_>, _> = rows.collect();
                Ok(results?)
            })
            .await
            .map_err(SqliteError::from)
    }

    async fn open_level(&self, immediate: bool) -> SqliteResult<()> {
        let depth = Arc::clone(&self.depth);
        self.conn
            .call(move |conn| {
                let level = depth.load(Ordering::SeqCst);
                if level == 0 {
                    conn.execute_batch(if immediate { "BEGIN IMMEDIATE" } else { "BEGIN" })?;
                } else {
                    conn.execute_batch(&format!("SAVEPOINT strata_{}", level))?;
                }
                depth.store(level + 1, Ordering::SeqCst);
                trace!(level = level + 1, "opened transaction level");
                Ok(())
            })
            .await
            .map_err(SqliteError::from)
    }

    /// Start a write transaction, taking SQLite's reserved lock up front.
    ///
    /// Returns `false` when another connection holds the lock past the busy timeout.
    pub async fn begin_immediate(&self) -> SqliteResult<bool> {
        if self.transaction_depth() > 0 {
            return Err(SqliteError::transaction(
                "cannot take the write lock inside an open transaction",
            ));
        }
        match self.open_level(true).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_busy() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn close_level(&self, commit: bool) -> SqliteResult<()> {
        let depth = Arc::clone(&self.depth);
        self.conn
            .call(move |conn| {
                let level = depth.load(Ordering::SeqCst);
                if level == 0 {
                    return Err(tokio_rusqlite::Error::Other(
                        "no open transaction".to_string().into(),
                    ));
                }
                if conn.is_autocommit() {
                    // SQLite already rolled the whole transaction back.
                    depth.store(0, Ordering::SeqCst);
                    if commit {
                        return Err(tokio_rusqlite::Error::Other(
                            "transaction was rolled back by the database".to_string().into(),
                        ));
                    }
                    return Ok(());
                }
                let sql = match (level, commit) {
                    (1, true) => "COMMIT".to_string(),
                    (1, false) => "ROLLBACK".to_string(),
                    (n, true) => format!("RELEASE SAVEPOINT strata_{}", n - 1),
                    (n, false) => format!(
                        "ROLLBACK TO SAVEPOINT strata_{0}; RELEASE SAVEPOINT strata_{0}",
                        n - 1
                    ),
                };
                conn.execute_batch(&sql)?;
                depth.store(level - 1, Ordering::SeqCst);
                trace!(level = level - 1, commit, "closed transaction level");
                Ok(())
            })
            .await
            .map_err(SqliteError::from)
    }

    /// Commit the outermost transaction opened by [`begin_immediate`](Self::begin_immediate).
    pub(crate) async fn commit_lock(&self) -> SqliteResult<()> {
        let depth = self.transaction_depth();
        if depth != 1 {
            return Err(SqliteError::transaction(format!(
                "cannot release the write lock with {} open transaction levels",
                depth
            )));
        }
        self.close_level(true).await
    }

    /// Roll back every open level and release the write lock.
    pub(crate) async fn rollback_lock(&self) -> SqliteResult<()> {
        self.reset().await
    }

    /// Roll back whatever is open, including work a dropped lock holder left behind.
    pub(crate) async fn reset(&self) -> SqliteResult<()> {
        let depth = Arc::clone(&self.depth);
        self.conn
            .call(move |conn| {
                if !conn.is_autocommit() {
                    conn.execute_batch("ROLLBACK")?;
                }
                depth.store(0, Ordering::SeqCst);
                Ok(())
            })
            .await
            .map_err(SqliteError::from)
    }
}

#[async_trait]
impl SqlExecutor for SqliteConnection {
    async fn execute(&self, sql: &str) -> MigrateResult<u64> {
        Ok(self.execute_params(sql, Vec::new()).await?)
    }

    async fn execute_with(&self, sql: &str, params: &[JsonValue]) -> MigrateResult<u64> {
        let params = params.iter().map(to_sqlite_value).collect();
        Ok(self.execute_params(sql, params).await?)
    }

    async fn query(&self, sql: &str) -> MigrateResult<Vec<Row>> {
        Ok(self.query_params(sql, Vec::new()).await?)
    }
}

#[async_trait]
impl TransactionalConnection for SqliteConnection {
    async fn begin(&self) -> MigrateResult<()> {
        Ok(self.open_level(false).await?)
    }

    async fn commit(&self) -> MigrateResult<()> {
        Ok(self.close_level(true).await?)
    }

    async fn rollback(&self) -> MigrateResult<()> {
        Ok(self.close_level(false).await?)
    }

    fn as_executor(&self) -> &dyn SqlExecutor {
        self
    }
}

/// Convert a JSON parameter to a SQLite value.
pub fn to_sqlite_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Convert a SQLite value to JSON.
pub fn from_sqlite_value(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            JsonValue::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
