//! SQLite dialect for Strata.
//!
//! This crate lets the Strata migration engine run against SQLite, using
//! `tokio-rusqlite` for asynchronous database access.
//!
//! # Features
//!
//! - Async/await support via `tokio-rusqlite`
//! - Transactional DDL with savepoint nesting
//! - Schema history table locked with `BEGIN IMMEDIATE`
//! - In-memory and file-based databases
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_migrate::{MigrationConfig, RetryPolicy};
//! use strata_sqlite::{SqliteConfig, connect, migration_engine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SqliteConfig::from_url("sqlite://./app.db")?;
//!     let conn = connect(&config, &RetryPolicy::default()).await?;
//!
//!     let engine = migration_engine(MigrationConfig::new(), conn);
//!     println!("{}", engine.migrate().await?.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod support;

use std::sync::Arc;

use parking_lot::Mutex;
use strata_migrate::{MigrateResult, MigrationConfig, MigrationEngine, MigrationError, RetryPolicy};
use tracing::warn;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};
pub use ledger::SqliteHistoryLedger;
pub use support::SqliteSupport;

/// Open a connection, retrying with `retry` while the database is unreachable.
pub async fn connect(config: &SqliteConfig, retry: &RetryPolicy) -> MigrateResult<SqliteConnection> {
    let last_error = Mutex::new(String::new());
    let outcome = retry
        .run(|attempt| {
            let last_error = &last_error;
            async move {
                match SqliteConnection::open(config).await {
                    Ok(conn) => Ok::<_, MigrationError>(Some(conn)),
                    Err(err) => {
                        warn!(attempt, path = config.path_str(), error = %err, "connection attempt failed");
                        *last_error.lock() = err.to_string();
                        Ok(None)
                    }
                }
            }
        })
        .await?;

    outcome.map_err(|exhausted| MigrationError::Connection {
        attempts: exhausted.attempts,
        message: last_error.into_inner(),
    })
}

/// Build a [`MigrationEngine`] whose ledger and migrations share `conn`.
pub fn migration_engine(config: MigrationConfig, conn: SqliteConnection) -> MigrationEngine {
    let ledger = SqliteHistoryLedger::new(conn.clone(), config.table.clone());
    let support = match &config.installed_by {
        Some(user) => SqliteSupport::new().with_user(user.clone()),
        None => SqliteSupport::new(),
    };
    MigrationEngine::new(config, Arc::new(support), Arc::new(ledger), Arc::new(conn))
}
