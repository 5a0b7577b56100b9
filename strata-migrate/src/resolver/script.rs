//! SQL script migrations.

use std::sync::Arc;

use async_trait::async_trait;

use super::{MigrationResolver, classify, parse_name};
use crate::config::NamingConvention;
use crate::error::MigrateResult;
use crate::migration::{MigrationKind, MigrationUnit, SqlScriptExecutor, compute_checksum};
use crate::placeholder::PlaceholderReplacer;
use crate::scanner::{Location, ResourceScanner};
use crate::sql::StatementSplitter;

/// Resolves `V<version>__<description>.sql` and `R__<description>.sql` files.
pub struct ScriptMigrationResolver {
    scanner: Arc<dyn ResourceScanner>,
    naming: NamingConvention,
    placeholders: Option<PlaceholderReplacer>,
    splitter: StatementSplitter,
}

impl ScriptMigrationResolver {
    /// Create a resolver with the given scanner and naming convention.
    pub fn new(scanner: Arc<dyn ResourceScanner>, naming: NamingConvention) -> Self {
        Self {
            scanner,
            naming,
            placeholders: None,
            splitter: StatementSplitter::default(),
        }
    }

    /// Substitute placeholders before splitting.
    pub fn with_placeholders(mut self, replacer: Option<PlaceholderReplacer>) -> Self {
        self.placeholders = replacer;
        self
    }

    /// Use a custom statement splitter.
    pub fn with_splitter(mut self, splitter: StatementSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    fn strip_suffix<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        self.naming
            .suffixes
            .iter()
            .filter(|suffix| file_name.ends_with(suffix.as_str()))
            .max_by_key(|suffix| suffix.len())
            .map(|suffix| &file_name[..file_name.len() - suffix.len()])
    }
}

#[async_trait]
impl MigrationResolver for ScriptMigrationResolver {
    async fn resolve(&self, location: &Location) -> MigrateResult<Vec<MigrationUnit>> {
        if !matches!(location, Location::FileSystem(_)) {
            return Ok(Vec::new());
        }

        let resources = self
            .scanner
            .scan(location, &self.naming.prefixes(), &self.naming.suffixes)
            .await?;

        let mut units = Vec::with_capacity(resources.len());
        for resource in resources {
            let Some(stem) = self.strip_suffix(&resource.file_name) else {
                continue;
            };
            let Some((repeatable, prefix_len)) = classify(stem, &self.naming) else {
                continue;
            };

            let (version, description) = parse_name(
                &resource.file_name,
                &stem[prefix_len..],
                &self.naming.separator,
                repeatable,
            )?;

            // The checksum covers the script as written, before substitution.
            let checksum = compute_checksum(&resource.content);
            let body = match &self.placeholders {
                Some(replacer) => replacer.replace(&resource.content)?,
                None => resource.content.clone(),
            };
            let statements = self.splitter.split(&body);

            units.push(MigrationUnit {
                version,
                description,
                script: resource.relative_path.clone(),
                checksum: Some(checksum),
                kind: MigrationKind::Script,
                executor: Arc::new(SqlScriptExecutor::new(statements)),
                physical_location: resource.physical_path.display().to_string(),
            });
        }

        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::scanner::FileSystemScanner;
    use crate::version::VersionKey;

    fn resolver() -> ScriptMigrationResolver {
        ScriptMigrationResolver::new(Arc::new(FileSystemScanner::new()), NamingConvention::default())
    }

    #[tokio::test]
    async fn test_resolves_versioned_and_repeatable_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__Create_users.sql"), "CREATE TABLE users (id INT);").unwrap();
        std::fs::write(dir.path().join("V1_1__Add_email.sql"), "ALTER TABLE users ADD email TEXT;").unwrap();
        std::fs::write(dir.path().join("R__Refresh_views.sql"), "SELECT 1; SELECT 2;").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let units = resolver()
            .resolve(&Location::filesystem(dir.path()))
            .await
            .unwrap();
        assert_eq!(units.len(), 3);

        let repeatable = units.iter().find(|u| u.is_repeatable()).unwrap();
        assert_eq!(repeatable.description, "Refresh views");
        assert_eq!(repeatable.script, "R__Refresh_views.sql");

        let add_email = units
            .iter()
            .find(|u| u.version == Some(VersionKey::parse("1.1").unwrap()))
            .unwrap();
        assert_eq!(add_email.description, "Add email");
        assert_eq!(
            add_email.checksum,
            Some(compute_checksum("ALTER TABLE users ADD email TEXT;"))
        );
        assert_eq!(add_email.kind, MigrationKind::Script);
    }

    #[tokio::test]
    async fn test_bad_name_aborts_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__ok.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("V1x__bad.sql"), "SELECT 1;").unwrap();

        let err = resolver()
            .resolve(&Location::filesystem(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidVersionFormat { .. }));
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_fails_at_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__x.sql"), "CREATE TABLE ${schema}.t (id INT);").unwrap();

        let replacer = PlaceholderReplacer::new(Default::default()).unwrap();
        let err = resolver()
            .with_placeholders(Some(replacer))
            .resolve(&Location::filesystem(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Placeholder(_)));
    }

    #[tokio::test]
    async fn test_checksum_is_computed_before_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let raw = "CREATE TABLE ${schema}.t (id INT);";
        std::fs::write(dir.path().join("V1__x.sql"), raw).unwrap();

        let values = [("schema".to_string(), "app".to_string())].into_iter().collect();
        let units = resolver()
            .with_placeholders(Some(PlaceholderReplacer::new(values).unwrap()))
            .resolve(&Location::filesystem(dir.path()))
            .await
            .unwrap();
        assert_eq!(units[0].checksum, Some(compute_checksum(raw)));
    }

    #[tokio::test]
    async fn test_registry_location_is_foreign() {
        let units = resolver().resolve(&Location::registry("core")).await.unwrap();
        assert!(units.is_empty());
    }
}
