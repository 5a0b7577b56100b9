//! The locked apply loop.
//!
//! Every iteration takes the schema history lock, re-reads the history and
//! applies the next migration (or, in group mode, every pending migration) in
//! its own transaction on the migration connection. The outcome of each step
//! decides whether the locked history transaction is committed or rolled back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::callback::{CallbackExecutor, Event};
use crate::dialect::{DbSupport, TransactionalConnection};
use crate::error::{MigrateResult, MigrationError};
use crate::history::{
    AppliedMigration, HistoryLedger, LedgerTransaction, NewAppliedMigration, acquire_lock,
    baseline_row, current_version,
};
use crate::migration::MigrationUnit;
use crate::retry::RetryPolicy;
use crate::version::VersionKey;

/// Cooperative stop signal, checked between migrations.
///
/// A running migration is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop after the current migration.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Settings of a single `migrate` run.
#[derive(Debug, Clone)]
pub struct MigratorOptions {
    /// Allow applying versions below the current one.
    pub out_of_order: bool,
    /// Apply the whole pending queue in one transaction.
    pub group: bool,
    /// Proceed past failed migrations newer than anything resolved.
    pub ignore_failed_future: bool,
    /// Recorded in `installed_by`.
    pub installed_by: String,
    /// Retry policy for the schema history lock.
    pub lock_retry: RetryPolicy,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            out_of_order: false,
            group: false,
            ignore_failed_future: false,
            installed_by: String::new(),
            lock_retry: RetryPolicy::default(),
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// Number of migrations applied.
    pub applied_count: usize,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
    /// Schema history rows written for applied migrations.
    pub applied_migrations: Vec<AppliedMigration>,
    /// Schema version before the run.
    pub initial_version: Option<VersionKey>,
    /// Schema version after the run.
    pub target_version: Option<VersionKey>,
    /// Warnings raised during the run.
    pub warnings: Vec<String>,
    /// Whether the run stopped on a cancellation request.
    pub cancelled: bool,
}

impl MigrationResult {
    fn empty() -> Self {
        Self {
            applied_count: 0,
            duration_ms: 0,
            applied_migrations: Vec::new(),
            initial_version: None,
            target_version: None,
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    /// Check if any migrations were applied.
    pub fn has_changes(&self) -> bool {
        self.applied_count > 0
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        match self.applied_count {
            0 => "Schema is up to date. No migration necessary.".to_string(),
            1 => format!(
                "Successfully applied 1 migration (execution time {})",
                format_duration(self.duration_ms)
            ),
            n => format!(
                "Successfully applied {} migrations (execution time {})",
                n,
                format_duration(self.duration_ms)
            ),
        }
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Format milliseconds as `MM:SS.mmms`.
pub fn format_duration(millis: u64) -> String {
    let minutes = millis / 60_000;
    let seconds = (millis / 1_000) % 60;
    let ms = millis % 1_000;
    format!("{:02}:{:02}.{:03}s", minutes, seconds, ms)
}

/// How a locked step ended. The loop commits or rolls back the history
/// transaction accordingly.
enum StepOutcome {
    /// Nothing left to apply.
    Done,
    /// Migrations were applied and recorded.
    Applied,
    /// A migration failed and a FAILED row was recorded.
    FailureRecorded(MigrationError),
    /// A migration failed and everything was rolled back.
    RolledBack(MigrationError),
}

/// Applies pending migrations under the schema history lock.
pub struct Migrator<'a> {
    support: &'a dyn DbSupport,
    ledger: &'a dyn HistoryLedger,
    conn: &'a dyn TransactionalConnection,
    options: MigratorOptions,
    cancel: CancellationToken,
    callbacks: CallbackExecutor,
    /// Cleared once the first repeatable of the run starts.
    previous_versioned: AtomicBool,
}

impl<'a> Migrator<'a> {
    /// Create a migrator.
    pub fn new(
        support: &'a dyn DbSupport,
        ledger: &'a dyn HistoryLedger,
        conn: &'a dyn TransactionalConnection,
        options: MigratorOptions,
    ) -> Self {
        Self {
            support,
            ledger,
            conn,
            options,
            cancel: CancellationToken::new(),
            callbacks: CallbackExecutor::default(),
            previous_versioned: AtomicBool::new(true),
        }
    }

    /// Stop between migrations when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Fire lifecycle events on `callbacks`.
    pub fn with_callbacks(mut self, callbacks: CallbackExecutor) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Apply every resolved migration up to `target` that has not been applied.
    ///
    /// `resolved` must be sorted as returned by the composite resolver.
    pub async fn migrate(
        &self,
        target: &VersionKey,
        resolved: &[MigrationUnit],
    ) -> MigrateResult<MigrationResult> {
        self.previous_versioned.store(true, Ordering::SeqCst);
        self.fire(Event::BeforeMigrate).await?;

        match self.run(target, resolved).await {
            Ok(result) => {
                self.fire(Event::AfterMigrate).await?;
                Ok(result)
            }
            Err(err) => {
                self.fire(Event::AfterMigrateError).await?;
                Err(err)
            }
        }
    }

    async fn fire(&self, event: Event) -> MigrateResult<()> {
        self.callbacks.fire(event, self.conn.as_executor(), None).await
    }

    async fn run(
        &self,
        target: &VersionKey,
        resolved: &[MigrationUnit],
    ) -> MigrateResult<MigrationResult> {
        let started = Instant::now();
        let mut result = MigrationResult::empty();
        let mut first = true;

        loop {
            if self.cancel.is_cancelled() {
                tracing::warn!("migration cancelled; committed progress is kept");
                result.cancelled = true;
                break;
            }

            let mut tx = acquire_lock(self.ledger, &self.options.lock_retry).await?;
            let outcome = self
                .step(tx.as_mut(), target, resolved, &mut result, first)
                .await;
            first = false;

            match outcome {
                Ok(StepOutcome::Done) => {
                    tx.commit().await?;
                    break;
                }
                Ok(StepOutcome::Applied) => tx.commit().await?,
                Ok(StepOutcome::FailureRecorded(err)) => {
                    tx.commit().await?;
                    return Err(err);
                }
                Ok(StepOutcome::RolledBack(err)) => {
                    tx.rollback().await?;
                    return Err(err);
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "rollback of schema history transaction failed");
                    }
                    return Err(err);
                }
            }
        }

        if self.previous_versioned.load(Ordering::SeqCst) {
            self.fire(Event::AfterVersioned).await?;
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            applied = result.applied_count,
            elapsed_ms = result.duration_ms,
            "{}",
            result.summary()
        );
        Ok(result)
    }

    async fn step(
        &self,
        tx: &mut dyn LedgerTransaction,
        target: &VersionKey,
        resolved: &[MigrationUnit],
        result: &mut MigrationResult,
        first: bool,
    ) -> MigrateResult<StepOutcome> {
        let rows = tx.applied_migrations().await?;
        let current = current_version(&rows);
        if first {
            result.initial_version = (!current.is_empty()).then(|| current.clone());
            if !target.is_latest() && *target < current {
                result.warn(format!(
                    "Schema is at version {} which is newer than the target {}",
                    current, target
                ));
            }
        }
        result.target_version = (!current.is_empty()).then(|| current.clone());

        let last_resolved = resolved
            .iter()
            .filter_map(|u| u.version.clone())
            .max()
            .unwrap_or(VersionKey::EMPTY);

        for row in rows.iter().filter(|r| r.is_versioned() && !r.success) {
            let Some(version) = &row.version else {
                continue;
            };
            let is_future = *version > last_resolved;
            if is_future && self.options.ignore_failed_future {
                if first {
                    result.warn(format!(
                        "Detected failed migration {} ({}) newer than any resolved migration; continuing",
                        version, row.script
                    ));
                }
                continue;
            }
            return Err(MigrationError::MigrationFailed {
                version: version.to_string(),
                script: row.script.clone(),
                rollback_performed: false,
                cause: "a previous attempt is recorded as failed in the schema history".to_string(),
            });
        }

        // Only versioned rows above the baseline marker put the database ahead of the code.
        let ahead = rows
            .iter()
            .filter(|r| r.is_versioned() && !r.is_baseline())
            .filter_map(|r| r.version.clone())
            .max()
            .unwrap_or(VersionKey::EMPTY);
        if !last_resolved.is_empty() && last_resolved < ahead {
            result.warn(format!(
                "Schema has version {} which is newer than the latest resolved migration {}",
                ahead, last_resolved
            ));
            return Ok(StepOutcome::Done);
        }

        let batch = self.next_batch(&rows, &current, target, resolved);
        if batch.is_empty() {
            return Ok(StepOutcome::Done);
        }
        self.apply_batch(tx, batch, result).await
    }

    fn next_batch<'r>(
        &self,
        rows: &[AppliedMigration],
        current: &VersionKey,
        target: &VersionKey,
        resolved: &'r [MigrationUnit],
    ) -> Vec<&'r MigrationUnit> {
        let applied: HashSet<&VersionKey> = rows.iter().filter_map(|r| r.version.as_ref()).collect();
        let baseline = baseline_row(rows)
            .and_then(|r| r.version.clone())
            .unwrap_or(VersionKey::EMPTY);
        let floor = if self.options.out_of_order {
            &baseline
        } else {
            current
        };

        let versioned = resolved.iter().filter(|unit| match &unit.version {
            Some(v) => v > floor && v > &baseline && v <= target && !applied.contains(v),
            None => false,
        });

        let mut batch: Vec<&MigrationUnit> = if self.options.group {
            versioned.collect()
        } else {
            versioned.take(1).collect()
        };

        if target.is_latest() && (self.options.group || batch.is_empty()) {
            let latest_runs = latest_repeatable_runs(rows);
            for unit in resolved.iter().filter(|u| u.is_repeatable()) {
                let pending = match latest_runs.get(unit.description.as_str()) {
                    None => true,
                    Some(row) if !row.success => {
                        tracing::warn!(
                            description = %unit.description,
                            "repeatable migration failed previously; run repair before it is retried"
                        );
                        false
                    }
                    Some(row) => row.checksum != unit.checksum,
                };
                if pending {
                    batch.push(unit);
                    if !self.options.group {
                        break;
                    }
                }
            }
        }

        batch
    }

    async fn apply_batch(
        &self,
        tx: &mut dyn LedgerTransaction,
        batch: Vec<&MigrationUnit>,
        result: &mut MigrationResult,
    ) -> MigrateResult<StepOutcome> {
        self.conn.begin().await?;

        let mut executed = Vec::with_capacity(batch.len());
        for unit in batch {
            tracing::info!(
                version = %unit.version_label(),
                description = %unit.description,
                "Migrating schema"
            );
            let started = Instant::now();
            let outcome = self.execute(unit).await;
            let elapsed_ms = started.elapsed().as_millis().min(i32::MAX as u128) as i32;

            let cause = match outcome {
                Ok(()) => {
                    tracing::debug!(version = %unit.version_label(), elapsed_ms, "migration succeeded");
                    executed.push((unit, elapsed_ms));
                    continue;
                }
                Err(cause) => cause,
            };

            tracing::error!(version = %unit.version_label(), script = %unit.script, error = %cause, "migration failed");
            if let Err(rollback_err) = self.conn.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback of migration transaction failed");
            }
            self.callbacks
                .fire(Event::AfterEachMigrateError, self.conn.as_executor(), Some(unit))
                .await?;

            if self.support.supports_ddl_transactions() {
                return Ok(StepOutcome::RolledBack(failure(unit, true, &cause)));
            }

            // Without DDL transactions the changes stay; record what happened.
            for (done, ms) in executed {
                self.record(tx, done, ms, true, result).await?;
            }
            self.record(tx, unit, elapsed_ms, false, result).await?;
            return Ok(StepOutcome::FailureRecorded(failure(unit, false, &cause)));
        }

        self.conn.commit().await?;
        for (unit, ms) in executed {
            self.record(tx, unit, ms, true, result).await?;
        }
        Ok(StepOutcome::Applied)
    }

    /// Run one migration between its `*EachMigrate` callbacks.
    async fn execute(&self, unit: &MigrationUnit) -> MigrateResult<()> {
        if unit.is_repeatable() && self.previous_versioned.swap(false, Ordering::SeqCst) {
            self.fire(Event::AfterVersioned).await?;
            self.fire(Event::BeforeRepeatables).await?;
        }

        let conn = self.conn.as_executor();
        self.callbacks.fire(Event::BeforeEachMigrate, conn, Some(unit)).await?;
        unit.executor.execute(conn).await?;
        self.callbacks.fire(Event::AfterEachMigrate, conn, Some(unit)).await
    }

    async fn record(
        &self,
        tx: &mut dyn LedgerTransaction,
        unit: &MigrationUnit,
        execution_time_ms: i32,
        success: bool,
        result: &mut MigrationResult,
    ) -> MigrateResult<()> {
        let row = tx
            .append(NewAppliedMigration {
                version: unit.version.clone(),
                description: unit.description.clone(),
                kind: unit.kind,
                script: unit.script.clone(),
                checksum: unit.checksum,
                installed_by: self.options.installed_by.clone(),
                execution_time_ms,
                success,
            })
            .await?;

        if success {
            if let Some(version) = &row.version {
                if result.target_version.as_ref().is_none_or(|current| version > current) {
                    result.target_version = Some(version.clone());
                }
            }
            result.applied_count += 1;
            result.applied_migrations.push(row);
        }
        Ok(())
    }
}

fn latest_repeatable_runs(rows: &[AppliedMigration]) -> HashMap<&str, &AppliedMigration> {
    let mut latest: HashMap<&str, &AppliedMigration> = HashMap::new();
    for row in rows.iter().filter(|r| !r.is_versioned()) {
        let entry = latest.entry(row.description.as_str()).or_insert(row);
        if row.installed_rank > entry.installed_rank {
            *entry = row;
        }
    }
    latest
}

fn failure(unit: &MigrationUnit, rollback_performed: bool, cause: &MigrationError) -> MigrationError {
    MigrationError::MigrationFailed {
        version: unit.version_label(),
        script: unit.script.clone(),
        rollback_performed,
        cause: cause.to_string(),
    }
}
