//! # Strata
//!
//! Versioned, checksummed, lock-protected database schema migrations.
//!
//! Strata provides:
//! - Versioned (`V1_2__Add_index.sql`) and repeatable (`R__Views.sql`) SQL scripts
//! - Migrations written in Rust, ordered alongside the scripts
//! - A schema history table with checksums, so drifted scripts are caught
//! - An exclusive lock around every change, so concurrent deploys are safe
//! - `migrate`, `info`, `validate`, `baseline` and `repair`
//! - Lifecycle callbacks before and after each command and each migration
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use strata::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = strata::sqlite::connect(
//!         &strata::sqlite::SqliteConfig::from_url("sqlite://app.db")?,
//!         &RetryPolicy::default(),
//!     )
//!     .await?;
//!
//!     let config = MigrationConfig::new().locations([Location::filesystem("db/migrations")]);
//!     let result = strata::sqlite::migration_engine(config, conn).migrate().await?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The migration engine: resolution, reconciliation and the apply loop.
pub mod migrate {
    pub use strata_migrate::*;
}

/// SQLite dialect.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use strata_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        Callback, CallbackContext, Event, InfoReport, Location, MigrateResult, MigrationConfig,
        MigrationEngine, MigrationError, MigrationState, ProgrammaticMigration,
        ProgrammaticMigrationResolver, RepairReport, RetryPolicy, SqlExecutor, VersionKey,
    };
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationEngine, MigrationError};
