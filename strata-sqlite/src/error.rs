//! Error types for SQLite operations.

use strata_migrate::MigrationError;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction bookkeeping error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored value could not be converted.
    #[error("Type conversion error: {0}")]
    TypeConversion(String),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transaction error.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// Whether the database reported `SQLITE_BUSY` or `SQLITE_LOCKED`.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
                matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for MigrationError {
    fn from(err: SqliteError) -> Self {
        match err {
            SqliteError::Sqlite(e) => MigrationError::database(e.to_string()),
            SqliteError::Config(msg) => MigrationError::configuration(msg),
            SqliteError::Connection(msg) => MigrationError::Connection {
                attempts: 1,
                message: msg,
            },
            SqliteError::Transaction(msg) => MigrationError::database(msg),
            SqliteError::TypeConversion(msg) => {
                MigrationError::database(format!("type conversion: {}", msg))
            }
        }
    }
}
