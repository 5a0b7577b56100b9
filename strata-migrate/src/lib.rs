//! # strata-migrate
//!
//! Migration engine for Strata.
//!
//! This crate provides functionality for:
//! - Resolving versioned and repeatable migrations from SQL scripts and Rust code
//! - Reconciling them against the schema history stored in the target database
//! - Applying pending migrations under an exclusive lock, one transaction each
//! - Baseline, repair, info and validate administration
//! - Lifecycle callbacks around every command and every applied migration
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Script files  │────▶│                   │     │ Schema       │
//! └───────────────┘     │ CompositeResolver │     │ history      │
//! ┌───────────────┐     │                   │     └──────┬───────┘
//! │ Rust registry │────▶│                   │            │
//! └───────────────┘     └─────────┬─────────┘            │
//!                                 ▼                      ▼
//!                         ┌──────────────┐       ┌──────────────┐
//!                         │  Reconciler  │◀──────│ Applied rows │
//!                         └──────┬───────┘       └──────────────┘
//!                                ▼
//!                         ┌──────────────┐
//!                         │   Migrator   │── locked apply loop
//!                         └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{Location, MigrationConfig, MigrationEngine};
//!
//! async fn run(
//!     support: Arc<dyn strata_migrate::DbSupport>,
//!     ledger: Arc<dyn strata_migrate::HistoryLedger>,
//!     conn: Arc<dyn strata_migrate::TransactionalConnection>,
//! ) -> strata_migrate::MigrateResult<()> {
//!     let config = MigrationConfig::new()
//!         .locations([Location::filesystem("db/migrations")]);
//!
//!     let engine = MigrationEngine::new(config, support, ledger, conn);
//!     let result = engine.migrate().await?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Naming
//!
//! ```text
//! db/migrations/
//! ├── V1__Create_users.sql        # versioned: 1, "Create users"
//! ├── V1_1__Add_email.sql         # versioned: 1.1, "Add email"
//! └── R__Refresh_views.sql        # repeatable: re-run when its checksum changes
//! ```

pub mod callback;
pub mod config;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod history;
pub mod memory;
pub mod migration;
pub mod migrator;
pub mod placeholder;
pub mod reconcile;
pub mod resolver;
pub mod retry;
pub mod scanner;
pub mod sql;
pub mod version;

pub use callback::{Callback, CallbackContext, CallbackExecutor, Event};
pub use config::{DEFAULT_TABLE, MigrationConfig, NamingConvention, PlaceholderConfig};
pub use dialect::{DbSupport, Row, SqlExecutor, TransactionalConnection};
pub use engine::{MigrationEngine, RepairReport};
pub use error::{MigrateResult, MigrationError};
pub use history::{AppliedMigration, HistoryLedger, LedgerTransaction, NewAppliedMigration};
pub use migration::{MigrationExecutor, MigrationKind, MigrationUnit, compute_checksum};
pub use migrator::{CancellationToken, MigrationResult, Migrator, MigratorOptions};
pub use placeholder::PlaceholderReplacer;
pub use reconcile::{
    InfoReport, MigrationState, ReconcileOptions, ReconciledEntry, VersionPattern, reconcile,
};
pub use resolver::{
    CompositeResolver, MigrationResolver, ProgrammaticMigration, ProgrammaticMigrationResolver,
    ScriptMigrationResolver,
};
pub use retry::RetryPolicy;
pub use scanner::{FileSystemScanner, Location, Resource, ResourceScanner};
pub use sql::{StatementSplitter, split_statements};
pub use version::VersionKey;
