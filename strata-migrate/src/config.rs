//! Engine configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MigrateResult;
use crate::placeholder::PlaceholderReplacer;
use crate::retry::RetryPolicy;
use crate::scanner::Location;
use crate::version::VersionKey;

/// Default schema history table name.
pub const DEFAULT_TABLE: &str = "strata_schema_history";

/// File and registry naming rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConvention {
    /// Prefix of versioned migrations.
    pub versioned_prefix: String,
    /// Prefix of repeatable migrations.
    pub repeatable_prefix: String,
    /// Separator between version and description.
    pub separator: String,
    /// Accepted script suffixes.
    pub suffixes: Vec<String>,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            versioned_prefix: "V".to_string(),
            repeatable_prefix: "R".to_string(),
            separator: "__".to_string(),
            suffixes: vec![".sql".to_string()],
        }
    }
}

impl NamingConvention {
    /// Both prefixes, for scanning.
    pub fn prefixes(&self) -> Vec<String> {
        vec![self.versioned_prefix.clone(), self.repeatable_prefix.clone()]
    }
}

/// Placeholder substitution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
    /// Whether scripts are run through the replacer.
    pub enabled: bool,
    /// Opening delimiter.
    pub prefix: String,
    /// Closing delimiter.
    pub suffix: String,
    /// Placeholder values.
    pub values: BTreeMap<String, String>,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "${".to_string(),
            suffix: "}".to_string(),
            values: BTreeMap::new(),
        }
    }
}

impl PlaceholderConfig {
    /// Build the replacer, or `None` when substitution is disabled.
    pub fn replacer(&self) -> MigrateResult<Option<PlaceholderReplacer>> {
        if !self.enabled {
            return Ok(None);
        }
        PlaceholderReplacer::with_delimiters(self.values.clone(), &self.prefix, &self.suffix)
            .map(Some)
    }
}

/// Configuration for the migration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Where migrations are discovered.
    pub locations: Vec<Location>,
    /// Schema history table name.
    pub table: String,
    /// Highest version to migrate to. Inclusive.
    pub target: VersionKey,
    /// Allow applying versions lower than the current one.
    pub out_of_order: bool,
    /// Apply all pending migrations in one transaction.
    pub group: bool,
    /// Run `validate` before `migrate`.
    pub validate_on_migrate: bool,
    /// Tolerate applied migrations that are no longer resolved (below the latest).
    pub ignore_missing: bool,
    /// Tolerate applied migrations newer than anything resolved.
    pub ignore_future: bool,
    /// Tolerate resolved migrations skipped because they are out of order.
    pub ignore_ignored: bool,
    /// Proceed past a failed migration that is newer than anything resolved.
    pub ignore_failed_future: bool,
    /// Versions (with `*` wildcards) exempt from validation.
    pub ignore_patterns: Vec<String>,
    /// Version recorded by `baseline`.
    pub baseline_version: VersionKey,
    /// Description recorded by `baseline`.
    pub baseline_description: String,
    /// Baseline automatically when the schema history is empty.
    pub baseline_on_migrate: bool,
    /// Script and registry naming rules.
    pub naming: NamingConvention,
    /// Placeholder substitution.
    pub placeholders: PlaceholderConfig,
    /// Recorded in `installed_by`; defaults to the database user.
    pub installed_by: Option<String>,
    /// Retry policy for the schema history lock.
    pub lock_retry: RetryPolicy,
    /// Retry policy for establishing connections.
    pub connect_retry: RetryPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            locations: vec![Location::filesystem("db/migrations")],
            table: DEFAULT_TABLE.to_string(),
            target: VersionKey::LATEST,
            out_of_order: false,
            group: false,
            validate_on_migrate: true,
            ignore_missing: false,
            ignore_future: true,
            ignore_ignored: false,
            ignore_failed_future: false,
            ignore_patterns: Vec::new(),
            baseline_version: VersionKey::major(1),
            baseline_description: "<< Baseline >>".to_string(),
            baseline_on_migrate: false,
            naming: NamingConvention::default(),
            placeholders: PlaceholderConfig::default(),
            installed_by: None,
            lock_retry: RetryPolicy::default(),
            connect_retry: RetryPolicy::default(),
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the migration locations.
    pub fn locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        self.locations = locations.into_iter().collect();
        self
    }

    /// Add a migration location.
    pub fn location(mut self, location: Location) -> Self {
        self.locations.push(location);
        self
    }

    /// Set the schema history table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the target version.
    pub fn target(mut self, target: VersionKey) -> Self {
        self.target = target;
        self
    }

    /// Allow out-of-order migrations.
    pub fn out_of_order(mut self, enabled: bool) -> Self {
        self.out_of_order = enabled;
        self
    }

    /// Apply pending migrations as one group.
    pub fn group(mut self, enabled: bool) -> Self {
        self.group = enabled;
        self
    }

    /// Validate before migrating.
    pub fn validate_on_migrate(mut self, enabled: bool) -> Self {
        self.validate_on_migrate = enabled;
        self
    }

    /// Tolerate missing migrations.
    pub fn ignore_missing(mut self, enabled: bool) -> Self {
        self.ignore_missing = enabled;
        self
    }

    /// Tolerate future migrations.
    pub fn ignore_future(mut self, enabled: bool) -> Self {
        self.ignore_future = enabled;
        self
    }

    /// Tolerate ignored migrations.
    pub fn ignore_ignored(mut self, enabled: bool) -> Self {
        self.ignore_ignored = enabled;
        self
    }

    /// Proceed past failed future migrations.
    pub fn ignore_failed_future(mut self, enabled: bool) -> Self {
        self.ignore_failed_future = enabled;
        self
    }

    /// Add a version pattern exempt from validation.
    pub fn ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_patterns.push(pattern.into());
        self
    }

    /// Set the baseline version.
    pub fn baseline_version(mut self, version: VersionKey) -> Self {
        self.baseline_version = version;
        self
    }

    /// Set the baseline description.
    pub fn baseline_description(mut self, description: impl Into<String>) -> Self {
        self.baseline_description = description.into();
        self
    }

    /// Baseline an empty schema history automatically.
    pub fn baseline_on_migrate(mut self, enabled: bool) -> Self {
        self.baseline_on_migrate = enabled;
        self
    }

    /// Set the naming convention.
    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    /// Set a placeholder value.
    pub fn placeholder(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.values.insert(name.into(), value.into());
        self
    }

    /// Enable or disable placeholder substitution.
    pub fn placeholders_enabled(mut self, enabled: bool) -> Self {
        self.placeholders.enabled = enabled;
        self
    }

    /// Set the `installed_by` value.
    pub fn installed_by(mut self, user: impl Into<String>) -> Self {
        self.installed_by = Some(user.into());
        self
    }

    /// Set the lock retry policy.
    pub fn lock_retry(mut self, policy: RetryPolicy) -> Self {
        self.lock_retry = policy;
        self
    }

    /// Set the connection retry policy.
    pub fn connect_retry(mut self, policy: RetryPolicy) -> Self {
        self.connect_retry = policy;
        self
    }
}
