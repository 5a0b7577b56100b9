//! Migrations written in Rust.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{MigrationResolver, classify, parse_name};
use crate::config::NamingConvention;
use crate::dialect::SqlExecutor;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::{MigrationExecutor, MigrationKind, MigrationUnit};
use crate::scanner::Location;

/// A migration implemented in code.
///
/// The name follows the script naming convention without a suffix, for
/// example `V3__Seed_users` or `R__Rebuild_search_index`.
#[async_trait]
pub trait ProgrammaticMigration: Send + Sync {
    /// Convention name carrying version and description.
    fn name(&self) -> &str;

    /// Checksum to record, if the migration wants drift detection.
    fn checksum(&self) -> Option<i32> {
        None
    }

    /// Apply the migration.
    async fn migrate(&self, conn: &dyn SqlExecutor) -> MigrateResult<()>;
}

struct ProgrammaticExecutor(Arc<dyn ProgrammaticMigration>);

#[async_trait]
impl MigrationExecutor for ProgrammaticExecutor {
    async fn execute(&self, conn: &dyn SqlExecutor) -> MigrateResult<()> {
        self.0.migrate(conn).await
    }
}

/// Resolves programmatic migrations registered under `registry:<name>` locations.
#[derive(Default)]
pub struct ProgrammaticMigrationResolver {
    naming: NamingConvention,
    registry: HashMap<String, Vec<Arc<dyn ProgrammaticMigration>>>,
}

impl ProgrammaticMigrationResolver {
    /// Create an empty resolver.
    pub fn new(naming: NamingConvention) -> Self {
        Self {
            naming,
            registry: HashMap::new(),
        }
    }

    /// Register `migration` under the location `registry:<location>`.
    pub fn register(
        mut self,
        location: impl Into<String>,
        migration: impl ProgrammaticMigration + 'static,
    ) -> Self {
        self.registry
            .entry(location.into())
            .or_default()
            .push(Arc::new(migration));
        self
    }

    /// Register an already shared migration.
    pub fn register_arc(
        mut self,
        location: impl Into<String>,
        migration: Arc<dyn ProgrammaticMigration>,
    ) -> Self {
        self.registry.entry(location.into()).or_default().push(migration);
        self
    }

    /// Number of registered migrations across all locations.
    pub fn len(&self) -> usize {
        self.registry.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MigrationResolver for ProgrammaticMigrationResolver {
    async fn resolve(&self, location: &Location) -> MigrateResult<Vec<MigrationUnit>> {
        let Location::Registry(name) = location else {
            return Ok(Vec::new());
        };
        let Some(migrations) = self.registry.get(name) else {
            return Ok(Vec::new());
        };

        let mut units = Vec::with_capacity(migrations.len());
        for migration in migrations {
            let full = migration.name();
            let Some((repeatable, prefix_len)) = classify(full, &self.naming) else {
                return Err(MigrationError::invalid_name(
                    full,
                    format!(
                        "programmatic migrations must start with '{}' or '{}'",
                        self.naming.versioned_prefix, self.naming.repeatable_prefix
                    ),
                ));
            };
            let (version, description) =
                parse_name(full, &full[prefix_len..], &self.naming.separator, repeatable)?;

            units.push(MigrationUnit {
                version,
                description,
                script: full.to_string(),
                checksum: migration.checksum(),
                kind: MigrationKind::Programmatic,
                executor: Arc::new(ProgrammaticExecutor(Arc::clone(migration))),
                physical_location: location.to_string(),
            });
        }

        Ok(units)
    }
}
