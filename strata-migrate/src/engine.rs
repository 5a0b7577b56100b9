//! Migration engine implementation.

use std::future::Future;
use std::sync::Arc;

use crate::callback::{Callback, CallbackExecutor, Event};
use crate::config::MigrationConfig;
use crate::dialect::{DbSupport, TransactionalConnection};
use crate::error::{MigrateResult, MigrationError};
use crate::history::{
    AppliedMigration, HistoryLedger, LedgerTransaction, NewAppliedMigration, acquire_lock,
};
use crate::migration::{MigrationKind, MigrationUnit};
use crate::migrator::{CancellationToken, MigrationResult, Migrator, MigratorOptions};
use crate::reconcile::{InfoReport, ReconcileOptions, ReconciledEntry, reconcile, validate};
use crate::resolver::{CompositeResolver, MigrationResolver, ScriptMigrationResolver};
use crate::scanner::{FileSystemScanner, ResourceScanner};
use crate::version::VersionKey;

/// What `repair` changed in the schema history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Number of failed rows deleted.
    pub removed_failed: usize,
    /// Versions whose checksum, description or type were realigned with the resolved migration.
    pub aligned: Vec<String>,
}

impl RepairReport {
    /// Whether the schema history was left untouched.
    pub fn is_empty(&self) -> bool {
        self.removed_failed == 0 && self.aligned.is_empty()
    }
}

/// The main migration engine.
///
/// Wires configuration, resolvers, schema history, dialect and connection
/// together. Every operation resolves migrations afresh.
pub struct MigrationEngine {
    config: MigrationConfig,
    support: Arc<dyn DbSupport>,
    ledger: Arc<dyn HistoryLedger>,
    conn: Arc<dyn TransactionalConnection>,
    scanner: Arc<dyn ResourceScanner>,
    resolvers: Vec<Arc<dyn MigrationResolver>>,
    callbacks: Vec<Arc<dyn Callback>>,
    cancel: CancellationToken,
}

impl MigrationEngine {
    /// Create a new migration engine with the filesystem script resolver.
    pub fn new(
        config: MigrationConfig,
        support: Arc<dyn DbSupport>,
        ledger: Arc<dyn HistoryLedger>,
        conn: Arc<dyn TransactionalConnection>,
    ) -> Self {
        Self {
            config,
            support,
            ledger,
            conn,
            scanner: Arc::new(FileSystemScanner::new()),
            resolvers: Vec::new(),
            callbacks: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Add a resolver, such as a programmatic migration registry.
    pub fn with_resolver(mut self, resolver: Arc<dyn MigrationResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Add a lifecycle callback. Callbacks run in the order they were added.
    pub fn with_callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Replace the scanner used by the script resolver.
    pub fn with_scanner(mut self, scanner: Arc<dyn ResourceScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Token that stops `migrate` between migrations.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn composite(&self) -> MigrateResult<CompositeResolver> {
        let script = ScriptMigrationResolver::new(Arc::clone(&self.scanner), self.config.naming.clone())
            .with_placeholders(self.config.placeholders.replacer()?);

        let mut resolvers: Vec<Arc<dyn MigrationResolver>> = vec![Arc::new(script)];
        resolvers.extend(self.resolvers.iter().cloned());
        Ok(CompositeResolver::new(resolvers, self.config.locations.clone()))
    }

    async fn resolve(&self) -> MigrateResult<Arc<[MigrationUnit]>> {
        self.composite()?.resolve_migrations().await
    }

    async fn installed_by(&self) -> MigrateResult<String> {
        match &self.config.installed_by {
            Some(user) => Ok(user.clone()),
            None => self.support.current_user(self.conn.as_executor()).await,
        }
    }

    async fn reconciled(
        &self,
        resolved: &[MigrationUnit],
    ) -> MigrateResult<(Vec<ReconciledEntry>, ReconcileOptions)> {
        let options = ReconcileOptions::from_config(&self.config)?;
        let applied = self.ledger.applied_migrations().await?;
        Ok((reconcile(resolved, &applied, &options), options))
    }

    fn callback_executor(&self) -> CallbackExecutor {
        CallbackExecutor::new(self.callbacks.clone())
    }

    /// Run `operation` between its `before`, `after` and `on_error` events.
    async fn with_events<T>(
        &self,
        before: Event,
        after: Event,
        on_error: Event,
        operation: impl Future<Output = MigrateResult<T>>,
    ) -> MigrateResult<T> {
        let callbacks = self.callback_executor();
        let conn = self.conn.as_executor();
        callbacks.fire(before, conn, None).await?;
        match operation.await {
            Ok(value) => {
                callbacks.fire(after, conn, None).await?;
                Ok(value)
            }
            Err(err) => {
                callbacks.fire(on_error, conn, None).await?;
                Err(err)
            }
        }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> MigrateResult<MigrationResult> {
        let resolved = self.resolve().await?;
        self.ledger.initialize().await?;

        if self.config.baseline_on_migrate && self.ledger.applied_migrations().await?.is_empty() {
            self.baseline().await?;
        }

        if self.config.validate_on_migrate {
            let (entries, options) = self.reconciled(&resolved).await?;
            validate(&entries, &options)?;
        }

        let options = MigratorOptions {
            out_of_order: self.config.out_of_order,
            group: self.config.group,
            ignore_failed_future: self.config.ignore_failed_future,
            installed_by: self.installed_by().await?,
            lock_retry: self.config.lock_retry,
        };

        tracing::info!(
            database = self.support.name(),
            table = self.ledger.table(),
            target = %self.config.target,
            "migrating"
        );
        Migrator::new(
            self.support.as_ref(),
            self.ledger.as_ref(),
            self.conn.as_ref(),
            options,
        )
        .with_cancellation(self.cancel.clone())
        .with_callbacks(self.callback_executor())
        .migrate(&self.config.target, &resolved)
        .await
    }

    /// Reconcile resolved migrations with the schema history.
    pub async fn info(&self) -> MigrateResult<InfoReport> {
        self.with_events(Event::BeforeInfo, Event::AfterInfo, Event::AfterInfoError, async {
            let resolved = self.resolve().await?;
            let (entries, _) = self.reconciled(&resolved).await?;
            Ok(InfoReport::new(entries))
        })
        .await
    }

    /// Fail if resolved migrations and the schema history disagree.
    pub async fn validate(&self) -> MigrateResult<()> {
        self.with_events(
            Event::BeforeValidate,
            Event::AfterValidate,
            Event::AfterValidateError,
            async {
                let resolved = self.resolve().await?;
                let (entries, options) = self.reconciled(&resolved).await?;
                validate(&entries, &options)?;
                tracing::info!(count = resolved.len(), "successfully validated migrations");
                Ok(())
            },
        )
        .await
    }

    /// Baseline with the configured version and description.
    pub async fn baseline(&self) -> MigrateResult<AppliedMigration> {
        let version = self.config.baseline_version.clone();
        let description = self.config.baseline_description.clone();
        self.baseline_with(version, description).await
    }

    /// Record a baseline marker on an empty schema history.
    ///
    /// Baselining again at the same version is a no-op that returns the existing marker.
    pub async fn baseline_with(
        &self,
        version: VersionKey,
        description: impl Into<String>,
    ) -> MigrateResult<AppliedMigration> {
        let description = description.into();
        self.with_events(
            Event::BeforeBaseline,
            Event::AfterBaseline,
            Event::AfterBaselineError,
            self.run_baseline(version, description),
        )
        .await
    }

    async fn run_baseline(
        &self,
        version: VersionKey,
        description: String,
    ) -> MigrateResult<AppliedMigration> {
        if version.as_text().is_none() {
            return Err(MigrationError::configuration(
                "baseline version must be a concrete version",
            ));
        }
        let installed_by = self.installed_by().await?;

        self.ledger.initialize().await?;
        let mut tx = acquire_lock(self.ledger.as_ref(), &self.config.lock_retry).await?;
        let rows = tx.applied_migrations().await?;

        if let Some(existing) = rows.iter().find(|r| r.is_baseline()) {
            let existing = existing.clone();
            tx.rollback().await?;
            if existing.version.as_ref() == Some(&version) {
                tracing::info!(version = %version, "schema history already baselined");
                return Ok(existing);
            }
            return Err(MigrationError::validation(format!(
                "Unable to baseline schema history table {} with version {}: it is already baselined with version {}",
                self.ledger.table(),
                version,
                existing.version.map(|v| v.to_string()).unwrap_or_default()
            )));
        }

        if !rows.is_empty() {
            tx.rollback().await?;
            return Err(MigrationError::validation(format!(
                "Unable to baseline schema history table {}: it already contains migrations",
                self.ledger.table()
            )));
        }

        let row = tx
            .append(NewAppliedMigration {
                script: format!("<< Baseline {} >>", version),
                version: Some(version.clone()),
                description,
                kind: MigrationKind::Baseline,
                checksum: None,
                installed_by,
                execution_time_ms: 0,
                success: true,
            })
            .await?;
        tx.commit().await?;

        tracing::info!(version = %version, "baselined schema history");
        Ok(row)
    }

    /// Delete failed rows from the schema history and realign the checksum,
    /// description and type of applied versioned migrations with what is
    /// resolved now.
    pub async fn repair(&self) -> MigrateResult<RepairReport> {
        self.with_events(
            Event::BeforeRepair,
            Event::AfterRepair,
            Event::AfterRepairError,
            self.run_repair(),
        )
        .await
    }

    async fn run_repair(&self) -> MigrateResult<RepairReport> {
        if !self.ledger.exists().await? {
            return Ok(RepairReport::default());
        }
        let resolved = self.resolve().await?;
        let options = ReconcileOptions::from_config(&self.config)?;

        let mut tx = acquire_lock(self.ledger.as_ref(), &self.config.lock_retry).await?;
        let report = match repair_locked(tx.as_mut(), &resolved, &options).await {
            Ok(report) => report,
            Err(err) => {
                tx.rollback().await?;
                return Err(err);
            }
        };
        tx.commit().await?;

        if report.is_empty() {
            tracing::info!(table = self.ledger.table(), "schema history needs no repair");
        } else {
            tracing::info!(
                removed = report.removed_failed,
                aligned = report.aligned.len(),
                table = self.ledger.table(),
                "repaired schema history"
            );
        }
        if report.removed_failed > 0 && !self.support.supports_ddl_transactions() {
            tracing::warn!("failed migrations may have left changes behind that need manual cleanup");
        }
        Ok(report)
    }
}

async fn repair_locked(
    tx: &mut dyn LedgerTransaction,
    resolved: &[MigrationUnit],
    options: &ReconcileOptions,
) -> MigrateResult<RepairReport> {
    let removed_failed = tx.remove_failed().await?;
    let rows = tx.applied_migrations().await?;

    let mut aligned = Vec::new();
    for entry in reconcile(resolved, &rows, options) {
        let (Some(unit), Some(row)) = (&entry.resolved, &entry.applied) else {
            continue;
        };
        if unit.is_repeatable() || row.is_baseline() {
            continue;
        }
        if unit.checksum == row.checksum
            && unit.description == row.description
            && unit.kind == row.kind
        {
            continue;
        }
        tracing::debug!(version = %unit.version_label(), "realigning schema history row");
        tx.update_checksum(row.installed_rank, unit.checksum, &unit.description, unit.kind)
            .await?;
        aligned.push(unit.version_label());
    }

    Ok(RepairReport {
        removed_failed,
        aligned,
    })
}
