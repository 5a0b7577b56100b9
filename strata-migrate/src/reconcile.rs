//! History reconciliation.
//!
//! [`reconcile`] pairs every resolved migration with its schema history rows and
//! classifies the pair into a [`MigrationState`]. It is a pure function; all
//! I/O happens before it is called.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use regex_lite::Regex;
use serde::Serialize;

use crate::error::{MigrateResult, MigrationError};
use crate::history::{AppliedMigration, current_version};
use crate::migration::{MigrationKind, MigrationUnit};
use crate::version::VersionKey;

/// Derived state of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    /// Resolved, not applied, will be applied.
    Pending,
    /// Resolved, not applied, above the target.
    AboveTarget,
    /// Resolved, not applied, at or below the baseline.
    BelowBaseline,
    /// Resolved, not applied, below the current version without out-of-order.
    Ignored,
    /// Applied successfully.
    Success,
    /// Applied and failed.
    Failed,
    /// Applied successfully after a higher version.
    OutOfOrder,
    /// Applied successfully, no longer resolved, below the latest resolved version.
    Missing,
    /// Applied and failed, no longer resolved, below the latest resolved version.
    MissingFailed,
    /// Applied successfully, above the latest resolved version.
    Future,
    /// Applied and failed, above the latest resolved version.
    FutureFailed,
    /// Baseline marker.
    Baseline,
    /// Repeatable whose checksum changed since its last run.
    Outdated,
    /// Earlier run of a repeatable.
    Superseded,
}

impl MigrationState {
    /// Short display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::AboveTarget => "Above Target",
            Self::BelowBaseline => "Below Baseline",
            Self::Ignored => "Ignored",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::OutOfOrder => "Out of Order",
            Self::Missing => "Missing",
            Self::MissingFailed => "Failed (Missing)",
            Self::Future => "Future",
            Self::FutureFailed => "Failed (Future)",
            Self::Baseline => "Baseline",
            Self::Outdated => "Outdated",
            Self::Superseded => "Superseded",
        }
    }

    /// Whether the migration still has to be run.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::Outdated)
    }

    /// Whether a schema history row backs this state.
    pub fn is_applied(&self) -> bool {
        !matches!(
            self,
            Self::Pending | Self::AboveTarget | Self::BelowBaseline | Self::Ignored
        )
    }

    /// Whether the backing row recorded a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::MissingFailed | Self::FutureFailed)
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A version pattern such as `1.*` or `2.3`, used to exempt migrations from validation.
#[derive(Debug, Clone)]
pub struct VersionPattern {
    raw: String,
    regex: Regex,
}

impl VersionPattern {
    /// Compile a pattern. `*` matches any run of characters; `_` is read as `.`.
    pub fn parse(raw: &str) -> MigrateResult<Self> {
        let normalized = raw.trim().replace('_', ".");
        if normalized.is_empty() {
            return Err(MigrationError::configuration("empty ignore pattern"));
        }
        let body = normalized
            .split('*')
            .map(regex_lite::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", body)).map_err(|e| {
            MigrationError::configuration(format!("invalid ignore pattern '{}': {}", raw, e))
        })?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    /// Whether `version` matches.
    pub fn matches(&self, version: &VersionKey) -> bool {
        version.as_text().is_some_and(|text| self.regex.is_match(text))
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Inputs to reconciliation besides the two lists.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Highest version to consider pending. Inclusive.
    pub target: VersionKey,
    /// Whether resolved versions below the current one may still be applied.
    pub out_of_order: bool,
    /// Versions exempt from validation.
    pub ignore_patterns: Vec<VersionPattern>,
    /// Tolerate `Missing` on validation.
    pub ignore_missing: bool,
    /// Tolerate `Future` on validation.
    pub ignore_future: bool,
    /// Tolerate `Ignored` on validation.
    pub ignore_ignored: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            target: VersionKey::LATEST,
            out_of_order: false,
            ignore_patterns: Vec::new(),
            ignore_missing: false,
            ignore_future: true,
            ignore_ignored: false,
        }
    }
}

impl ReconcileOptions {
    /// Build from an engine configuration.
    pub fn from_config(config: &crate::config::MigrationConfig) -> MigrateResult<Self> {
        let ignore_patterns = config
            .ignore_patterns
            .iter()
            .map(|p| VersionPattern::parse(p))
            .collect::<MigrateResult<Vec<_>>>()?;
        Ok(Self {
            target: config.target.clone(),
            out_of_order: config.out_of_order,
            ignore_patterns,
            ignore_missing: config.ignore_missing,
            ignore_future: config.ignore_future,
            ignore_ignored: config.ignore_ignored,
        })
    }

    fn is_exempt(&self, version: Option<&VersionKey>) -> bool {
        version.is_some_and(|v| self.ignore_patterns.iter().any(|p| p.matches(v)))
    }
}

/// One line of the reconciled view.
#[derive(Debug, Clone)]
pub struct ReconciledEntry {
    /// The resolved migration, if one exists.
    pub resolved: Option<MigrationUnit>,
    /// The schema history row, if one exists.
    pub applied: Option<AppliedMigration>,
    /// Derived state.
    pub state: MigrationState,
    /// Extra context, such as why a migration was ignored.
    pub diagnostic: Option<String>,
}

impl ReconciledEntry {
    fn new(
        resolved: Option<MigrationUnit>,
        applied: Option<AppliedMigration>,
        state: MigrationState,
    ) -> Self {
        Self {
            resolved,
            applied,
            state,
            diagnostic: None,
        }
    }

    fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    /// Version, preferring the schema history row.
    pub fn version(&self) -> Option<&VersionKey> {
        match (&self.applied, &self.resolved) {
            (Some(a), _) => a.version.as_ref(),
            (None, Some(r)) => r.version.as_ref(),
            (None, None) => None,
        }
    }

    /// Description, preferring the schema history row.
    pub fn description(&self) -> &str {
        match (&self.applied, &self.resolved) {
            (Some(a), _) => &a.description,
            (None, Some(r)) => &r.description,
            (None, None) => "",
        }
    }

    /// Script identity, preferring the schema history row.
    pub fn script(&self) -> &str {
        match (&self.applied, &self.resolved) {
            (Some(a), _) => &a.script,
            (None, Some(r)) => &r.script,
            (None, None) => "",
        }
    }

    /// Migration kind, preferring the schema history row.
    pub fn kind(&self) -> Option<MigrationKind> {
        match (&self.applied, &self.resolved) {
            (Some(a), _) => Some(a.kind),
            (None, Some(r)) => Some(r.kind),
            (None, None) => None,
        }
    }

    /// Checksum, preferring the resolved migration.
    pub fn checksum(&self) -> Option<i32> {
        match (&self.resolved, &self.applied) {
            (Some(r), _) => r.checksum,
            (None, Some(a)) => a.checksum,
            (None, None) => None,
        }
    }

    /// Whether this is a repeatable migration.
    pub fn is_repeatable(&self) -> bool {
        self.version().is_none()
    }

    fn sort_key(&self) -> (bool, Option<VersionKey>, i32, String) {
        (
            self.is_repeatable(),
            self.version().cloned(),
            self.applied.as_ref().map_or(i32::MAX, |a| a.installed_rank),
            self.description().to_string(),
        )
    }
}

/// Classify `resolved` against `applied`.
///
/// `resolved` must be sorted (as returned by the composite resolver). The
/// result is in version order with repeatables last.
pub fn reconcile(
    resolved: &[MigrationUnit],
    applied: &[AppliedMigration],
    options: &ReconcileOptions,
) -> Vec<ReconciledEntry> {
    let mut rows: Vec<&AppliedMigration> = applied.iter().collect();
    rows.sort_by_key(|r| r.installed_rank);

    let last_resolved = resolved
        .iter()
        .filter_map(|u| u.version.clone())
        .max()
        .unwrap_or(VersionKey::EMPTY);
    let last_applied = current_version(applied);
    let baseline = rows
        .iter()
        .find(|r| r.is_baseline())
        .and_then(|r| r.version.clone())
        .unwrap_or(VersionKey::EMPTY);

    let resolved_versioned: BTreeMap<VersionKey, &MigrationUnit> = resolved
        .iter()
        .filter_map(|u| u.version.clone().map(|v| (v, u)))
        .collect();

    let mut entries = Vec::with_capacity(resolved.len() + applied.len());
    let mut matched = HashSet::new();

    // Applied versioned rows, in rank order so out-of-order can be detected.
    let mut highest_so_far = VersionKey::EMPTY;
    for row in rows.iter().filter(|r| r.is_versioned()) {
        let Some(version) = row.version.clone() else {
            continue;
        };
        let out_of_order = version < highest_so_far;
        if version > highest_so_far {
            highest_so_far = version.clone();
        }

        if row.is_baseline() {
            entries.push(ReconciledEntry::new(None, Some((*row).clone()), MigrationState::Baseline));
            continue;
        }

        match resolved_versioned.get(&version) {
            Some(unit) => {
                matched.insert(version.clone());
                let state = if !row.success {
                    MigrationState::Failed
                } else if out_of_order {
                    MigrationState::OutOfOrder
                } else {
                    MigrationState::Success
                };
                entries.push(ReconciledEntry::new(
                    Some((*unit).clone()),
                    Some((*row).clone()),
                    state,
                ));
            }
            None => {
                let state = match (version < last_resolved, row.success) {
                    (true, true) => MigrationState::Missing,
                    (true, false) => MigrationState::MissingFailed,
                    (false, true) => MigrationState::Future,
                    (false, false) => MigrationState::FutureFailed,
                };
                entries.push(ReconciledEntry::new(None, Some((*row).clone()), state));
            }
        }
    }

    // Resolved versioned migrations without a row.
    for (version, unit) in &resolved_versioned {
        if matched.contains(version) {
            continue;
        }
        let unit = (*unit).clone();
        let entry = if *version <= baseline {
            ReconciledEntry::new(Some(unit), None, MigrationState::BelowBaseline)
        } else if *version > options.target {
            ReconciledEntry::new(Some(unit), None, MigrationState::AboveTarget)
        } else if *version < last_applied && !options.out_of_order {
            ReconciledEntry::new(Some(unit), None, MigrationState::Ignored).with_diagnostic(format!(
                "Detected resolved migration not applied to database: {} (version {} is below the current version {}; enable out-of-order to apply it)",
                unit_script(resolved, version),
                version,
                last_applied
            ))
        } else {
            ReconciledEntry::new(Some(unit), None, MigrationState::Pending)
        };
        entries.push(entry);
    }

    entries.extend(reconcile_repeatables(resolved, &rows));
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    entries
}

fn unit_script(resolved: &[MigrationUnit], version: &VersionKey) -> String {
    resolved
        .iter()
        .find(|u| u.version.as_ref() == Some(version))
        .map(|u| u.script.clone())
        .unwrap_or_default()
}

fn reconcile_repeatables(
    resolved: &[MigrationUnit],
    rows: &[&AppliedMigration],
) -> Vec<ReconciledEntry> {
    let resolved_repeatable: HashMap<&str, &MigrationUnit> = resolved
        .iter()
        .filter(|u| u.is_repeatable())
        .map(|u| (u.description.as_str(), u))
        .collect();

    let mut latest_runs: HashMap<&str, i32> = HashMap::new();
    for row in rows.iter().filter(|r| !r.is_versioned()) {
        let rank = latest_runs.entry(row.description.as_str()).or_insert(row.installed_rank);
        *rank = (*rank).max(row.installed_rank);
    }

    let mut entries = Vec::new();
    for row in rows.iter().filter(|r| !r.is_versioned()) {
        let unit = resolved_repeatable.get(row.description.as_str()).copied();
        let is_latest = latest_runs.get(row.description.as_str()) == Some(&row.installed_rank);

        let state = if !is_latest {
            MigrationState::Superseded
        } else if !row.success {
            MigrationState::Failed
        } else {
            match unit {
                None => MigrationState::Missing,
                Some(u) if u.checksum == row.checksum => MigrationState::Success,
                Some(_) => MigrationState::Outdated,
            }
        };

        let attached = if is_latest { unit.cloned() } else { None };
        entries.push(ReconciledEntry::new(attached, Some((*row).clone()), state));
    }

    for unit in resolved.iter().filter(|u| u.is_repeatable()) {
        if !latest_runs.contains_key(unit.description.as_str()) {
            entries.push(ReconciledEntry::new(
                Some(unit.clone()),
                None,
                MigrationState::Pending,
            ));
        }
    }

    entries
}

/// Check a reconciled set for drift and unexpected states.
pub fn validate(entries: &[ReconciledEntry], options: &ReconcileOptions) -> MigrateResult<()> {
    for entry in entries {
        if options.is_exempt(entry.version()) {
            continue;
        }

        if let (Some(unit), Some(row)) = (&entry.resolved, &entry.applied) {
            if unit.is_repeatable() || row.is_baseline() || entry.state.is_failed() {
                // Repeatable drift is Outdated, not a mismatch. A failed row is reported by migrate.
            } else if unit.kind != row.kind {
                return Err(mismatch(unit, "type", row.kind.to_string(), unit.kind.to_string()));
            } else if unit.checksum != row.checksum {
                return Err(mismatch(
                    unit,
                    "checksum",
                    format_checksum(row.checksum),
                    format_checksum(unit.checksum),
                ));
            } else if unit.description != row.description {
                return Err(mismatch(
                    unit,
                    "description",
                    row.description.clone(),
                    unit.description.clone(),
                ));
            }
        }

        let label = || {
            format!(
                "{} ({})",
                entry.version().map_or_else(|| entry.description().to_string(), |v| v.to_string()),
                entry.script()
            )
        };

        match entry.state {
            MigrationState::Missing | MigrationState::MissingFailed if !options.ignore_missing => {
                return Err(MigrationError::validation(format!(
                    "Detected applied migration not resolved locally: {}",
                    label()
                )));
            }
            MigrationState::Future | MigrationState::FutureFailed if !options.ignore_future => {
                return Err(MigrationError::validation(format!(
                    "Detected applied migration newer than any resolved migration: {}",
                    label()
                )));
            }
            MigrationState::Ignored if !options.ignore_ignored => {
                return Err(MigrationError::validation(
                    entry
                        .diagnostic
                        .clone()
                        .unwrap_or_else(|| format!("Detected ignored migration: {}", label())),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn mismatch(
    unit: &MigrationUnit,
    field: &'static str,
    applied: String,
    resolved: String,
) -> MigrationError {
    MigrationError::MigrationMismatch {
        version: unit.version_label(),
        script: unit.script.clone(),
        field,
        applied,
        resolved,
    }
}

fn format_checksum(checksum: Option<i32>) -> String {
    checksum.map_or_else(|| "null".to_string(), |c| c.to_string())
}

/// Reconciled view returned by `info`.
#[derive(Debug, Clone)]
pub struct InfoReport {
    entries: Vec<ReconciledEntry>,
}

impl InfoReport {
    /// Wrap reconciled entries.
    pub fn new(entries: Vec<ReconciledEntry>) -> Self {
        Self { entries }
    }

    /// Every entry, in version order.
    pub fn all(&self) -> &[ReconciledEntry] {
        &self.entries
    }

    /// The entry of the highest applied versioned migration.
    pub fn current(&self) -> Option<&ReconciledEntry> {
        self.entries
            .iter()
            .filter(|e| e.state.is_applied() && e.version().is_some())
            .max_by(|a, b| a.version().cmp(&b.version()))
    }

    /// Entries still to be applied.
    pub fn pending(&self) -> Vec<&ReconciledEntry> {
        self.entries.iter().filter(|e| e.state.is_pending()).collect()
    }

    /// Entries backed by a schema history row.
    pub fn applied(&self) -> Vec<&ReconciledEntry> {
        self.entries.iter().filter(|e| e.state.is_applied()).collect()
    }

    /// Entries in a failed state.
    pub fn failed(&self) -> Vec<&ReconciledEntry> {
        self.entries.iter().filter(|e| e.state.is_failed()).collect()
    }

    /// Validate the report against `options`.
    pub fn validate(&self, options: &ReconcileOptions) -> MigrateResult<()> {
        validate(&self.entries, options)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::dialect::SqlExecutor;
    use crate::migration::MigrationExecutor;

    struct Noop;

    #[async_trait::async_trait]
    impl MigrationExecutor for Noop {
        async fn execute(&self, _conn: &dyn SqlExecutor) -> MigrateResult<()> {
            Ok(())
        }
    }

    fn v(s: &str) -> VersionKey {
        VersionKey::parse(s).unwrap()
    }

    fn unit(version: Option<&str>, description: &str, checksum: i32) -> MigrationUnit {
        MigrationUnit {
            version: version.map(v),
            description: description.to_string(),
            script: match version {
                Some(ver) => format!("V{}__{}.sql", ver, description),
                None => format!("R__{}.sql", description),
            },
            checksum: Some(checksum),
            kind: MigrationKind::Script,
            executor: Arc::new(Noop),
            physical_location: String::new(),
        }
    }

    fn row_for(rank: i32, unit: &MigrationUnit, success: bool) -> AppliedMigration {
        AppliedMigration {
            installed_rank: rank,
            version: unit.version.clone(),
            description: unit.description.clone(),
            kind: unit.kind,
            script: unit.script.clone(),
            checksum: unit.checksum,
            installed_by: "tester".to_string(),
            installed_on: Utc::now(),
            execution_time_ms: 1,
            success,
        }
    }

    fn states(entries: &[ReconciledEntry]) -> Vec<(String, MigrationState)> {
        entries
            .iter()
            .map(|e| {
                let key = e
                    .version()
                    .map_or_else(|| format!("R:{}", e.description()), |v| v.to_string());
                (key, e.state)
            })
            .collect()
    }

    #[test]
    fn test_all_pending_on_empty_ledger() {
        let resolved = vec![unit(Some("1"), "a", 1), unit(Some("2"), "b", 2)];
        let entries = reconcile(&resolved, &[], &ReconcileOptions::default());
        assert_eq!(
            states(&entries),
            vec![
                ("1".to_string(), MigrationState::Pending),
                ("2".to_string(), MigrationState::Pending),
            ]
        );
    }

    #[test]
    fn test_missing_applied_migration() {
        let v1 = unit(Some("1"), "a", 1);
        let v2 = unit(Some("2"), "b", 2);
        let v3 = unit(Some("3"), "c", 3);
        let applied = vec![row_for(1, &v1, true), row_for(2, &v2, true), row_for(3, &v3, true)];
        let resolved = vec![v1, v3];

        let entries = reconcile(&resolved, &applied, &ReconcileOptions::default());
        assert_eq!(entries[1].state, MigrationState::Missing);

        let err = validate(&entries, &ReconcileOptions::default()).unwrap_err();
        assert!(matches!(err, MigrationError::Validation(_)));

        let lenient = ReconcileOptions {
            ignore_missing: true,
            ..ReconcileOptions::default()
        };
        assert!(validate(&entries, &lenient).is_ok());
    }

    #[test]
    fn test_future_applied_migration() {
        let v1 = unit(Some("1"), "a", 1);
        let v2 = unit(Some("2"), "b", 2);
        let applied = vec![row_for(1, &v1, true), row_for(2, &v2, false)];
        let entries = reconcile(&[v1], &applied, &ReconcileOptions::default());
        assert_eq!(entries[1].state, MigrationState::FutureFailed);

        assert!(validate(&entries, &ReconcileOptions::default()).is_ok());
        let strict = ReconcileOptions {
            ignore_future: false,
            ..ReconcileOptions::default()
        };
        assert!(validate(&entries, &strict).is_err());
    }

    #[test]
    fn test_ignored_without_out_of_order_pending_with_it() {
        let v1 = unit(Some("1"), "a", 1);
        let v2 = unit(Some("2"), "b", 2);
        let v3 = unit(Some("3"), "c", 3);
        let applied = vec![row_for(1, &v1, true), row_for(2, &v3, true)];
        let resolved = vec![v1, v2, v3];

        let entries = reconcile(&resolved, &applied, &ReconcileOptions::default());
        let v2_entry = entries.iter().find(|e| e.version() == Some(&v("2"))).unwrap();
        assert_eq!(v2_entry.state, MigrationState::Ignored);
        assert!(v2_entry.diagnostic.as_deref().unwrap().contains("V2__b.sql"));
        assert!(validate(&entries, &ReconcileOptions::default()).is_err());

        let ooo = ReconcileOptions {
            out_of_order: true,
            ..ReconcileOptions::default()
        };
        let entries = reconcile(&resolved, &applied, &ooo);
        let v2_entry = entries.iter().find(|e| e.version() == Some(&v("2"))).unwrap();
        assert_eq!(v2_entry.state, MigrationState::Pending);
    }

    #[test]
    fn test_out_of_order_row() {
        let v1 = unit(Some("1"), "a", 1);
        let v2 = unit(Some("2"), "b", 2);
        let v3 = unit(Some("3"), "c", 3);
        let applied = vec![
            row_for(1, &v1, true),
            row_for(2, &v3, true),
            row_for(3, &v2, true),
        ];
        let entries = reconcile(&[v1, v2, v3], &applied, &ReconcileOptions::default());
        assert_eq!(
            states(&entries),
            vec![
                ("1".to_string(), MigrationState::Success),
                ("2".to_string(), MigrationState::OutOfOrder),
                ("3".to_string(), MigrationState::Success),
            ]
        );
    }

    #[test]
    fn test_target_and_baseline() {
        let v1 = unit(Some("1"), "a", 1);
        let v2 = unit(Some("2"), "b", 2);
        let v3 = unit(Some("3"), "c", 3);
        let mut baseline = row_for(1, &v1, true);
        baseline.kind = MigrationKind::Baseline;
        baseline.description = "<< Baseline >>".to_string();

        let options = ReconcileOptions {
            target: v("2"),
            ..ReconcileOptions::default()
        };
        let entries = reconcile(&[v1, v2, v3], &[baseline], &options);
        assert_eq!(
            states(&entries),
            vec![
                ("1".to_string(), MigrationState::Baseline),
                ("1".to_string(), MigrationState::BelowBaseline),
                ("2".to_string(), MigrationState::Pending),
                ("3".to_string(), MigrationState::AboveTarget),
            ]
        );
    }

    #[test]
    fn test_checksum_mismatch_and_ignore_pattern() {
        let v1 = unit(Some("1.1"), "a", 1);
        let mut row = row_for(1, &v1, true);
        row.checksum = Some(99);
        let entries = reconcile(&[v1], &[row], &ReconcileOptions::default());

        match validate(&entries, &ReconcileOptions::default()).unwrap_err() {
            MigrationError::MigrationMismatch {
                field,
                applied,
                resolved,
                ..
            } => {
                assert_eq!(field, "checksum");
                assert_eq!(applied, "99");
                assert_eq!(resolved, "1");
            }
            other => panic!("unexpected error: {other}"),
        }

        let exempt = ReconcileOptions {
            ignore_patterns: vec![VersionPattern::parse("1.*").unwrap()],
            ..ReconcileOptions::default()
        };
        assert!(validate(&entries, &exempt).is_ok());
    }

    #[test]
    fn test_failed_row_is_not_a_mismatch() {
        let v1 = unit(Some("1"), "a", 1);
        let v2 = unit(Some("2"), "b", 2);
        let mut failed = row_for(2, &v2, false);
        failed.checksum = Some(99);
        let applied = vec![row_for(1, &v1, true), failed];
        let entries = reconcile(&[v1, v2], &applied, &ReconcileOptions::default());

        assert_eq!(entries[1].state, MigrationState::Failed);
        assert!(validate(&entries, &ReconcileOptions::default()).is_ok());
    }

    #[test]
    fn test_description_mismatch() {
        let v1 = unit(Some("1"), "a", 1);
        let mut row = row_for(1, &v1, true);
        row.description = "renamed".to_string();
        let entries = reconcile(&[v1], &[row], &ReconcileOptions::default());
        assert!(matches!(
            validate(&entries, &ReconcileOptions::default()),
            Err(MigrationError::MigrationMismatch { field: "description", .. })
        ));
    }

    #[test]
    fn test_repeatable_states() {
        let views_v1 = unit(None, "views", 1);
        let views_v2 = unit(None, "views", 2);
        let gone = unit(None, "gone", 7);
        let applied = vec![
            row_for(1, &views_v1, true),
            row_for(2, &views_v2, true),
            row_for(3, &gone, true),
        ];
        let resolved = vec![unit(None, "funcs", 5), unit(None, "views", 3)];

        let entries = reconcile(&resolved, &applied, &ReconcileOptions::default());
        assert_eq!(
            states(&entries),
            vec![
                ("R:views".to_string(), MigrationState::Superseded),
                ("R:views".to_string(), MigrationState::Outdated),
                ("R:gone".to_string(), MigrationState::Missing),
                ("R:funcs".to_string(), MigrationState::Pending),
            ]
        );

        let report = InfoReport::new(entries);
        let pending: Vec<_> = report.pending().iter().map(|e| e.description().to_string()).collect();
        assert_eq!(pending, vec!["views", "funcs"]);
    }

    #[test]
    fn test_info_report_views() {
        let v1 = unit(Some("1"), "a", 1);
        let v2 = unit(Some("2"), "b", 2);
        let applied = vec![row_for(1, &v1, true)];
        let report = InfoReport::new(reconcile(&[v1, v2], &applied, &ReconcileOptions::default()));

        assert_eq!(report.all().len(), 2);
        assert_eq!(report.current().and_then(|e| e.version()), Some(&v("1")));
        assert_eq!(report.pending().len(), 1);
        assert_eq!(report.applied().len(), 1);
        assert!(report.failed().is_empty());
    }

    #[test]
    fn test_version_pattern() {
        let pattern = VersionPattern::parse("2_*").unwrap();
        assert!(pattern.matches(&v("2.1")));
        assert!(pattern.matches(&v("2.1.5")));
        assert!(!pattern.matches(&v("12.1")));
        assert!(!pattern.matches(&VersionKey::LATEST));
        assert!(VersionPattern::parse("  ").is_err());
    }
}
