//! Migration resolution.
//!
//! Resolvers turn a [`Location`] into [`MigrationUnit`]s. The
//! [`CompositeResolver`] runs every resolver over every location and merges
//! the output into one sorted, collision-checked list.

mod programmatic;
mod script;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::NamingConvention;
use crate::error::{MigrateResult, MigrationError};
use crate::migration::MigrationUnit;
use crate::scanner::Location;
use crate::version::VersionKey;

pub use programmatic::{ProgrammaticMigration, ProgrammaticMigrationResolver};
pub use script::ScriptMigrationResolver;

/// Produces migrations from a location.
#[async_trait]
pub trait MigrationResolver: Send + Sync {
    /// Resolve the migrations at `location`.
    ///
    /// Empty, absent and foreign-scheme locations yield an empty list.
    async fn resolve(&self, location: &Location) -> MigrateResult<Vec<MigrationUnit>>;
}

/// Merges the output of several resolvers.
pub struct CompositeResolver {
    resolvers: Vec<Arc<dyn MigrationResolver>>,
    locations: Vec<Location>,
    cache: Mutex<Option<Arc<[MigrationUnit]>>>,
}

impl CompositeResolver {
    /// Create a composite over `resolvers` and `locations`.
    pub fn new(resolvers: Vec<Arc<dyn MigrationResolver>>, locations: Vec<Location>) -> Self {
        Self {
            resolvers,
            locations,
            cache: Mutex::new(None),
        }
    }

    /// All migrations, sorted by version with repeatables last.
    ///
    /// The result is cached until [`CompositeResolver::invalidate`].
    pub async fn resolve_migrations(&self) -> MigrateResult<Arc<[MigrationUnit]>> {
        if let Some(cached) = self.cache.lock().as_ref() {
            return Ok(Arc::clone(cached));
        }

        let mut unique = HashSet::new();
        for location in &self.locations {
            for resolver in &self.resolvers {
                unique.extend(resolver.resolve(location).await?);
            }
        }

        let mut units: Vec<MigrationUnit> = unique.into_iter().collect();
        units.sort_by(|a, b| a.order_cmp(b).then_with(|| a.script.cmp(&b.script)));
        check_collisions(&units)?;

        tracing::debug!(count = units.len(), "resolved migrations");
        let units: Arc<[MigrationUnit]> = units.into();
        *self.cache.lock() = Some(Arc::clone(&units));
        Ok(units)
    }

    /// Drop the cached resolution.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }
}

fn check_collisions(units: &[MigrationUnit]) -> MigrateResult<()> {
    for pair in units.windows(2) {
        let (first, second) = (&pair[0], &pair[1]);
        if first.order_key() == second.order_key() {
            let version = match &first.version {
                Some(v) => v.to_string(),
                None => format!("(repeatable) {}", first.description),
            };
            return Err(MigrationError::ConflictingMigration {
                version,
                first_script: first.script.clone(),
                first_kind: first.kind.to_string(),
                second_script: second.script.clone(),
                second_kind: second.kind.to_string(),
            });
        }
    }
    Ok(())
}

/// Parse `<version><separator><description>` after the prefix and suffix have
/// been stripped from `name`.
///
/// Repeatable names must carry no version; versioned names must carry one.
pub(crate) fn parse_name(
    full_name: &str,
    body: &str,
    separator: &str,
    repeatable: bool,
) -> MigrateResult<(Option<VersionKey>, String)> {
    let Some(index) = body.find(separator) else {
        return Err(MigrationError::invalid_name(
            full_name,
            format!("description must be separated from version by '{}'", separator),
        ));
    };

    let version_part = &body[..index];
    let description = body[index + separator.len()..].replace('_', " ").trim().to_string();

    if repeatable {
        if !version_part.is_empty() {
            return Err(MigrationError::invalid_name(
                full_name,
                "repeatable migrations must not have a version",
            ));
        }
        return Ok((None, description));
    }

    if version_part.is_empty() {
        return Err(MigrationError::invalid_name(
            full_name,
            "versioned migrations must have a version",
        ));
    }
    if version_part.starts_with(['_', '.']) {
        return Err(MigrationError::invalid_name(
            full_name,
            "version may not start with a separator",
        ));
    }

    let version = VersionKey::parse(version_part)?;
    Ok((Some(version), description))
}

/// Which prefix `name` carries, preferring the longer one when both match.
pub(crate) fn classify(name: &str, naming: &NamingConvention) -> Option<(bool, usize)> {
    let versioned = name.starts_with(naming.versioned_prefix.as_str());
    let repeatable = name.starts_with(naming.repeatable_prefix.as_str());
    match (versioned, repeatable) {
        (true, true) => {
            if naming.repeatable_prefix.len() > naming.versioned_prefix.len() {
                Some((true, naming.repeatable_prefix.len()))
            } else {
                Some((false, naming.versioned_prefix.len()))
            }
        }
        (true, false) => Some((false, naming.versioned_prefix.len())),
        (false, true) => Some((true, naming.repeatable_prefix.len())),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlExecutor;
    use crate::migration::{MigrationExecutor, MigrationKind};

    struct Noop;

    #[async_trait]
    impl MigrationExecutor for Noop {
        async fn execute(&self, _conn: &dyn SqlExecutor) -> MigrateResult<()> {
            Ok(())
        }
    }

    struct Fixed(Vec<MigrationUnit>);

    #[async_trait]
    impl MigrationResolver for Fixed {
        async fn resolve(&self, _location: &Location) -> MigrateResult<Vec<MigrationUnit>> {
            Ok(self.0.clone())
        }
    }

    fn unit(version: &str, script: &str, kind: MigrationKind) -> MigrationUnit {
        MigrationUnit {
            version: Some(VersionKey::parse(version).unwrap()),
            description: "d".to_string(),
            script: script.to_string(),
            checksum: Some(1),
            kind,
            executor: Arc::new(Noop),
            physical_location: String::new(),
        }
    }

    fn composite(resolvers: Vec<Vec<MigrationUnit>>) -> CompositeResolver {
        let resolvers = resolvers
            .into_iter()
            .map(|units| Arc::new(Fixed(units)) as Arc<dyn MigrationResolver>)
            .collect();
        CompositeResolver::new(resolvers, vec![Location::registry("any")])
    }

    #[tokio::test]
    async fn test_merges_and_sorts() {
        let resolver = composite(vec![
            vec![unit("3", "V3", MigrationKind::Script)],
            vec![
                unit("1", "V1", MigrationKind::Programmatic),
                unit("2", "V2", MigrationKind::Script),
            ],
        ]);
        let units = resolver.resolve_migrations().await.unwrap();
        let scripts: Vec<_> = units.iter().map(|u| u.script.as_str()).collect();
        assert_eq!(scripts, vec!["V1", "V2", "V3"]);
    }

    #[tokio::test]
    async fn test_identical_units_collapse() {
        let resolver = composite(vec![
            vec![unit("1", "V1", MigrationKind::Script)],
            vec![unit("1", "V1", MigrationKind::Script)],
        ]);
        assert_eq!(resolver.resolve_migrations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_collision_independent_of_order() {
        let a = unit("2", "V2__a.sql", MigrationKind::Script);
        let b = unit("2.0", "V2__b", MigrationKind::Programmatic);

        for resolvers in [
            vec![vec![a.clone()], vec![b.clone()]],
            vec![vec![b.clone()], vec![a.clone()]],
        ] {
            let err = composite(resolvers).resolve_migrations().await.unwrap_err();
            match err {
                MigrationError::ConflictingMigration {
                    first_script,
                    second_script,
                    ..
                } => {
                    assert_eq!(first_script, "V2__a.sql");
                    assert_eq!(second_script, "V2__b");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_locations_resolve_nothing() {
        let resolver = CompositeResolver::new(
            vec![Arc::new(Fixed(vec![unit("1", "V1", MigrationKind::Script)]))],
            Vec::new(),
        );
        assert!(resolver.resolve_migrations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_and_invalidate() {
        let resolver = composite(vec![vec![unit("1", "V1", MigrationKind::Script)]]);
        let first = resolver.resolve_migrations().await.unwrap();
        let second = resolver.resolve_migrations().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        resolver.invalidate();
        let third = resolver.resolve_migrations().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_parse_name_rules() {
        let (v, d) = parse_name("V9_4__EmailAxel.sql", "9_4__EmailAxel", "__", false).unwrap();
        assert_eq!(v.unwrap().to_string(), "9.4");
        assert_eq!(d, "EmailAxel");

        let (_, d) = parse_name("V1__Big_jump.sql", "1__Big_jump", "__", false).unwrap();
        assert_eq!(d, "Big jump");

        let (v, _) = parse_name("V009_4__x.sql", "009_4__x", "__", false).unwrap();
        assert_eq!(v.unwrap().to_string(), "009.4");

        let (v, d) = parse_name("R__Refresh_views.sql", "__Refresh_views", "__", true).unwrap();
        assert!(v.is_none());
        assert_eq!(d, "Refresh views");

        assert!(parse_name("V__x.sql", "__x", "__", false).is_err());
        assert!(parse_name("V_8_0__x.sql", "_8_0__x", "__", false).is_err());
        assert!(parse_name("R1.0__x.sql", "1.0__x", "__", true).is_err());
        assert!(parse_name("V1-x.sql", "1-x", "__", false).is_err());
        assert!(matches!(
            parse_name("V1a__x.sql", "1a__x", "__", false),
            Err(MigrationError::InvalidVersionFormat { .. })
        ));
    }

    #[test]
    fn test_classify_prefers_longer_prefix() {
        let naming = NamingConvention {
            versioned_prefix: "V".to_string(),
            repeatable_prefix: "VR".to_string(),
            ..NamingConvention::default()
        };
        assert_eq!(classify("VR__views.sql", &naming), Some((true, 2)));
        assert_eq!(classify("V1__a.sql", &naming), Some((false, 1)));
        assert_eq!(classify("U1__a.sql", &naming), None);
    }
}
