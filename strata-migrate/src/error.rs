//! Error types for the migration engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error.
    #[error("Database error: {0}")]
    Database(String),

    /// Malformed version string.
    #[error("Invalid version '{version}': {reason}")]
    InvalidVersionFormat {
        /// The rejected input.
        version: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A script or programmatic migration name that does not follow the naming convention.
    #[error("Invalid migration name '{name}': {reason}")]
    InvalidMigrationName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two different migrations claim the same version.
    #[error(
        "Found more than one migration with version {version} \
         (offenders: {first_kind} '{first_script}' and {second_kind} '{second_script}')"
    )]
    ConflictingMigration {
        /// The contested version (or repeatable description).
        version: String,
        /// Script identity of the first offender.
        first_script: String,
        /// Kind of the first offender.
        first_kind: String,
        /// Script identity of the second offender.
        second_script: String,
        /// Kind of the second offender.
        second_kind: String,
    },

    /// A resolved migration drifted from the row recorded when it was applied.
    #[error("Migration {field} mismatch for migration {script} (version {version}): applied={applied}, resolved={resolved}")]
    MigrationMismatch {
        /// Version of the drifted migration.
        version: String,
        /// Script identity.
        script: String,
        /// Which attribute drifted (checksum, description, type).
        field: &'static str,
        /// Value stored in the schema history.
        applied: String,
        /// Value computed from the resolved migration.
        resolved: String,
    },

    /// A migration failed while being applied.
    #[error("{}", migration_failed_message(.version, .script, .rollback_performed, .cause))]
    MigrationFailed {
        /// Version of the failed migration.
        version: String,
        /// Script identity of the failed migration.
        script: String,
        /// Whether the database changes were rolled back.
        rollback_performed: bool,
        /// Root cause reported by the executor.
        cause: String,
    },

    /// The schema history lock could not be acquired within the retry budget.
    #[error("Unable to acquire the schema history lock on '{table}' after {attempts} attempts ({waited:?})")]
    LockTimeout {
        /// Ledger table name.
        table: String,
        /// Number of attempts made.
        attempts: u32,
        /// Total time spent waiting.
        waited: Duration,
    },

    /// The database connection could not be established within the retry budget.
    #[error("Unable to connect to the database after {attempts} attempts: {message}")]
    Connection {
        /// Number of attempts made.
        attempts: u32,
        /// Last error reported by the driver.
        message: String,
    },

    /// Resolved migrations and schema history disagree.
    #[error("Validate failed: {0}")]
    Validation(String),

    /// Placeholder substitution failed.
    #[error("Placeholder error: {0}")]
    Placeholder(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// General migration error.
    #[error("Migration error: {0}")]
    Other(String),
}

fn migration_failed_message(
    version: &str,
    script: &str,
    rollback_performed: &bool,
    cause: &str,
) -> String {
    if *rollback_performed {
        format!(
            "Migration {} ({}) failed: {}. Changes successfully rolled back.",
            version, script, cause
        )
    } else {
        format!(
            "Migration {} ({}) failed: {}. Changes were not rolled back: restore backups and \
             repair the schema history manually.",
            version, script, cause
        )
    }
}

impl MigrationError {
    /// Create a database error.
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid version error.
    pub fn invalid_version(version: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVersionFormat {
            version: version.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid migration name error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMigrationName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a placeholder error.
    pub fn placeholder(msg: impl Into<String>) -> Self {
        Self::Placeholder(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a recoverable error.
    ///
    /// Only lock and connection acquisition are retried; everything else is final.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Connection { .. })
    }

    /// The version a failed or drifted migration refers to, if any.
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::MigrationFailed { version, .. }
            | Self::MigrationMismatch { version, .. }
            | Self::ConflictingMigration { version, .. } => Some(version.as_str()),
            _ => None,
        }
    }
}
