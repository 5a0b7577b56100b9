//! Resolved migration units.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dialect::SqlExecutor;
use crate::error::{MigrateResult, MigrationError};
use crate::version::VersionKey;

/// Where a migration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationKind {
    /// A SQL script discovered by a resource scanner.
    Script,
    /// A Rust type registered in code.
    Programmatic,
    /// Marker row written by `baseline`. Never produced by a resolver.
    Baseline,
}

impl MigrationKind {
    /// Text stored in the `type` column of the schema history.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "SCRIPT",
            Self::Programmatic => "PROGRAMMATIC",
            Self::Baseline => "BASELINE",
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationKind {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCRIPT" | "SQL" => Ok(Self::Script),
            "PROGRAMMATIC" => Ok(Self::Programmatic),
            "BASELINE" => Ok(Self::Baseline),
            other => Err(MigrationError::database(format!(
                "unknown migration type '{}' in schema history",
                other
            ))),
        }
    }
}

/// Runs the body of one migration against the migration connection.
///
/// The caller owns the surrounding transaction.
#[async_trait::async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Execute the migration.
    async fn execute(&self, conn: &dyn SqlExecutor) -> MigrateResult<()>;
}

/// Executes a pre-split list of SQL statements in order.
#[derive(Debug, Clone)]
pub struct SqlScriptExecutor {
    statements: Vec<String>,
}

impl SqlScriptExecutor {
    /// Create an executor for already-split statements.
    pub fn new(statements: Vec<String>) -> Self {
        Self { statements }
    }

    /// The statements this executor runs.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

#[async_trait::async_trait]
impl MigrationExecutor for SqlScriptExecutor {
    async fn execute(&self, conn: &dyn SqlExecutor) -> MigrateResult<()> {
        for (index, statement) in self.statements.iter().enumerate() {
            tracing::trace!(statement = index + 1, sql = %statement, "executing statement");
            conn.execute(statement).await?;
        }
        Ok(())
    }
}

/// A migration discovered by a resolver, ready to be reconciled and applied.
#[derive(Clone)]
pub struct MigrationUnit {
    /// Version, or `None` for a repeatable migration.
    pub version: Option<VersionKey>,
    /// Human readable description.
    pub description: String,
    /// Identity of the migration: path relative to its location or registered name.
    pub script: String,
    /// CRC32 of the migration content.
    pub checksum: Option<i32>,
    /// Resolver family.
    pub kind: MigrationKind,
    /// Runs the migration.
    pub executor: Arc<dyn MigrationExecutor>,
    /// Where the migration physically lives. Diagnostics only.
    pub physical_location: String,
}

/// Sort position of a migration: versioned units first, then repeatables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderKey {
    /// A versioned migration.
    Versioned(VersionKey),
    /// A repeatable migration, keyed by description.
    Repeatable(String),
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Versioned(v) => write!(f, "'{}'", v),
            Self::Repeatable(d) => write!(f, "(repeatable) '{}'", d),
        }
    }
}

impl MigrationUnit {
    /// Whether this is a repeatable migration.
    pub fn is_repeatable(&self) -> bool {
        self.version.is_none()
    }

    /// Ordering key. Equal keys on unequal units are a collision.
    pub fn order_key(&self) -> OrderKey {
        match &self.version {
            Some(v) => OrderKey::Versioned(v.clone()),
            None => OrderKey::Repeatable(self.description.clone()),
        }
    }

    /// Compare by version; repeatables after versioned units, by description.
    pub fn order_cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }

    /// Version text for logs and errors.
    pub fn version_label(&self) -> String {
        match &self.version {
            Some(v) => v.to_string(),
            None => "<< repeatable >>".to_string(),
        }
    }
}

impl PartialEq for MigrationUnit {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.description == other.description
            && self.script == other.script
            && self.checksum == other.checksum
    }
}

impl Eq for MigrationUnit {}

impl Hash for MigrationUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
        self.description.hash(state);
        self.script.hash(state);
        self.checksum.hash(state);
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("script", &self.script)
            .field("checksum", &self.checksum)
            .field("kind", &self.kind)
            .field("physical_location", &self.physical_location)
            .finish_non_exhaustive()
    }
}

/// CRC32 checksum of script content, as a signed 32-bit value.
///
/// Line endings are normalized and a leading byte-order mark is ignored so the
/// same script checks out identically on every platform.
pub fn compute_checksum(content: &str) -> i32 {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut hasher = crc32fast::Hasher::new();
    for line in content.lines() {
        hasher.update(line.as_bytes());
    }
    hasher.finalize() as i32
}
