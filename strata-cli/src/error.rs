//! CLI error types and result alias.

use miette::Diagnostic;
use strata_migrate::MigrationError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(strata::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(strata::config))]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    #[diagnostic(code(strata::validation))]
    Validation(String),

    /// Migration error
    #[error("Migration error: {0}")]
    #[diagnostic(code(strata::migration))]
    Migration(String),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(
        code(strata::database),
        help("check the database url and that no other process holds the schema history lock")
    )]
    Database(String),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(strata::command))]
    Command(String),
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<MigrationError> for CliError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Validation(msg) => CliError::Validation(msg),
            MigrationError::Configuration(msg) => CliError::Config(msg),
            MigrationError::Database(msg) => CliError::Database(msg),
            MigrationError::Other(msg) => CliError::Migration(msg),
            MigrationError::Io(err) => CliError::Io(err),
            err @ MigrationError::MigrationMismatch { .. } => CliError::Validation(err.to_string()),
            err @ (MigrationError::Placeholder(_)
            | MigrationError::InvalidVersionFormat { .. }
            | MigrationError::InvalidMigrationName { .. }) => CliError::Config(err.to_string()),
            err @ (MigrationError::Connection { .. } | MigrationError::LockTimeout { .. }) => {
                CliError::Database(err.to_string())
            }
            err => CliError::Migration(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_error_mapping() {
        let err: CliError = MigrationError::validation("Detected failed migration").into();
        assert!(matches!(err, CliError::Validation(_)));

        let err: CliError = MigrationError::configuration("bad pattern").into();
        assert!(matches!(err, CliError::Config(_)));

        let err: CliError = MigrationError::LockTimeout {
            table: "strata_schema_history".to_string(),
            attempts: 3,
            waited: std::time::Duration::from_millis(30),
        }
        .into();
        assert!(matches!(err, CliError::Database(_)));

        let err: CliError = MigrationError::MigrationFailed {
            version: "2".to_string(),
            script: "V2__x.sql".to_string(),
            rollback_performed: true,
            cause: "boom".to_string(),
        }
        .into();
        assert!(err.to_string().starts_with("Migration error:"));
    }
}
