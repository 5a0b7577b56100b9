//! In-memory collaborators.
//!
//! [`InMemoryLedger`], [`InMemoryConnection`] and [`InMemorySupport`] implement
//! the database contracts without a database. They back the engine's own tests
//! and are handy for testing programmatic migrations.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::DEFAULT_TABLE;
use crate::dialect::{DbSupport, Row, SqlExecutor, TransactionalConnection, quote_with};
use crate::error::{MigrateResult, MigrationError};
use crate::history::{AppliedMigration, HistoryLedger, LedgerTransaction, NewAppliedMigration};
use crate::migration::MigrationKind;
use crate::version::VersionKey;

/// Schema history kept in memory.
///
/// Clones share the same rows and lock, so two clones behave like two
/// processes pointed at one database.
#[derive(Clone)]
pub struct InMemoryLedger {
    table: String,
    rows: Arc<Mutex<Vec<AppliedMigration>>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    initialized: Arc<Mutex<bool>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            rows: Arc::new(Mutex::new(Vec::new())),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            initialized: Arc::new(Mutex::new(false)),
        }
    }

    /// Seed a committed row.
    pub fn seed(
        &self,
        version: Option<&str>,
        description: &str,
        script: &str,
        checksum: Option<i32>,
        success: bool,
    ) -> MigrateResult<()> {
        let version = version.map(VersionKey::parse).transpose()?;
        self.seed_row(version, description, script, checksum, MigrationKind::Script, success);
        Ok(())
    }

    /// Seed a committed baseline marker.
    pub fn seed_baseline(&self, version: &str) -> MigrateResult<()> {
        let version = VersionKey::parse(version)?;
        self.seed_row(
            Some(version.clone()),
            "<< Baseline >>",
            &format!("<< Baseline {} >>", version),
            None,
            MigrationKind::Baseline,
            true,
        );
        Ok(())
    }

    fn seed_row(
        &self,
        version: Option<VersionKey>,
        description: &str,
        script: &str,
        checksum: Option<i32>,
        kind: MigrationKind,
        success: bool,
    ) {
        *self.initialized.lock() = true;
        let mut rows = self.rows.lock();
        let installed_rank = next_rank(&rows);
        rows.push(AppliedMigration {
            installed_rank,
            version,
            description: description.to_string(),
            kind,
            script: script.to_string(),
            checksum,
            installed_by: "seed".to_string(),
            installed_on: Utc::now(),
            execution_time_ms: 0,
            success,
        });
    }

    /// Snapshot of the committed rows.
    pub fn rows(&self) -> Vec<AppliedMigration> {
        self.rows.lock().clone()
    }
}

fn next_rank(rows: &[AppliedMigration]) -> i32 {
    rows.iter().map(|r| r.installed_rank).max().unwrap_or(0) + 1
}

#[async_trait]
impl HistoryLedger for InMemoryLedger {
    fn table(&self) -> &str {
        &self.table
    }

    async fn exists(&self) -> MigrateResult<bool> {
        Ok(*self.initialized.lock())
    }

    async fn initialize(&self) -> MigrateResult<()> {
        *self.initialized.lock() = true;
        Ok(())
    }

    async fn applied_migrations(&self) -> MigrateResult<Vec<AppliedMigration>> {
        let mut rows = self.rows.lock().clone();
        rows.sort_by_key(|r| r.installed_rank);
        Ok(rows)
    }

    async fn try_lock(&self) -> MigrateResult<Option<Box<dyn LedgerTransaction>>> {
        let Ok(guard) = Arc::clone(&self.lock).try_lock_owned() else {
            return Ok(None);
        };
        let snapshot = self.rows.lock().clone();
        Ok(Some(Box::new(InMemoryTransaction {
            committed: Arc::clone(&self.rows),
            working: snapshot,
            _guard: guard,
        })))
    }
}

struct InMemoryTransaction {
    committed: Arc<Mutex<Vec<AppliedMigration>>>,
    working: Vec<AppliedMigration>,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn applied_migrations(&mut self) -> MigrateResult<Vec<AppliedMigration>> {
        let mut rows = self.working.clone();
        rows.sort_by_key(|r| r.installed_rank);
        Ok(rows)
    }

    async fn append(&mut self, row: NewAppliedMigration) -> MigrateResult<AppliedMigration> {
        let applied = AppliedMigration {
            installed_rank: next_rank(&self.working),
            version: row.version,
            description: row.description,
            kind: row.kind,
            script: row.script,
            checksum: row.checksum,
            installed_by: row.installed_by,
            installed_on: Utc::now(),
            execution_time_ms: row.execution_time_ms,
            success: row.success,
        };
        self.working.push(applied.clone());
        Ok(applied)
    }

    async fn remove_failed(&mut self) -> MigrateResult<usize> {
        let before = self.working.len();
        self.working.retain(|r| r.success);
        Ok(before - self.working.len())
    }

    async fn update_checksum(
        &mut self,
        installed_rank: i32,
        checksum: Option<i32>,
        description: &str,
        kind: MigrationKind,
    ) -> MigrateResult<()> {
        let row = self
            .working
            .iter_mut()
            .find(|r| r.installed_rank == installed_rank)
            .ok_or_else(|| {
                MigrationError::database(format!("no schema history row with rank {}", installed_rank))
            })?;
        row.checksum = checksum;
        row.description = description.to_string();
        row.kind = kind;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        let this = *self;
        *this.committed.lock() = this.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct ConnectionState {
    committed: Vec<String>,
    /// One buffer per open transaction level.
    open: Vec<Vec<String>>,
    rolled_back: usize,
}

/// A connection that records statements instead of running them.
///
/// Statements containing a registered failure marker fail. With
/// `ddl_transactions` disabled, statements survive a rollback, as DDL does on
/// databases without transactional DDL.
#[derive(Clone)]
pub struct InMemoryConnection {
    state: Arc<Mutex<ConnectionState>>,
    failures: Arc<Mutex<HashSet<String>>>,
    ddl_transactions: bool,
    statement_delay: Option<Duration>,
}

impl Default for InMemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnection {
    /// Create a connection with transactional DDL.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState::default())),
            failures: Arc::new(Mutex::new(HashSet::new())),
            ddl_transactions: true,
            statement_delay: None,
        }
    }

    /// Keep statements on rollback.
    pub fn without_ddl_transactions(mut self) -> Self {
        self.ddl_transactions = false;
        self
    }

    /// Sleep before every statement, to simulate slow migrations.
    pub fn with_statement_delay(mut self, delay: Duration) -> Self {
        self.statement_delay = Some(delay);
        self
    }

    /// Fail any statement containing `marker`.
    pub fn fail_on(&self, marker: impl Into<String>) {
        self.failures.lock().insert(marker.into());
    }

    /// Statements that are durable: committed, or kept despite a rollback.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    /// Number of rollbacks performed.
    pub fn rollbacks(&self) -> usize {
        self.state.lock().rolled_back
    }

    fn record(&self, sql: &str) -> MigrateResult<()> {
        if let Some(marker) = self.failures.lock().iter().find(|m| sql.contains(m.as_str())) {
            return Err(MigrationError::database(format!(
                "statement failed on '{}': {}",
                marker, sql
            )));
        }
        let mut state = self.state.lock();
        match state.open.last_mut() {
            Some(buffer) => buffer.push(sql.to_string()),
            None => state.committed.push(sql.to_string()),
        }
        Ok(())
    }
}

#[async_trait]
impl SqlExecutor for InMemoryConnection {
    async fn execute(&self, sql: &str) -> MigrateResult<u64> {
        if let Some(delay) = self.statement_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(sql)?;
        Ok(0)
    }

    async fn execute_with(&self, sql: &str, _params: &[Value]) -> MigrateResult<u64> {
        self.execute(sql).await
    }

    async fn query(&self, sql: &str) -> MigrateResult<Vec<Row>> {
        self.record(sql)?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl TransactionalConnection for InMemoryConnection {
    async fn begin(&self) -> MigrateResult<()> {
        self.state.lock().open.push(Vec::new());
        Ok(())
    }

    async fn commit(&self) -> MigrateResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .open
            .pop()
            .ok_or_else(|| MigrationError::database("commit without an open transaction"))?;
        match state.open.last_mut() {
            Some(parent) => parent.extend(buffer),
            None => state.committed.extend(buffer),
        }
        Ok(())
    }

    async fn rollback(&self) -> MigrateResult<()> {
        let mut state = self.state.lock();
        let buffer = state
            .open
            .pop()
            .ok_or_else(|| MigrationError::database("rollback without an open transaction"))?;
        state.rolled_back += 1;
        if !self.ddl_transactions {
            state.committed.extend(buffer);
        }
        Ok(())
    }

    fn as_executor(&self) -> &dyn SqlExecutor {
        self
    }
}

/// Dialect description for the in-memory doubles.
#[derive(Debug, Clone, Copy)]
pub struct InMemorySupport {
    ddl_transactions: bool,
}

impl InMemorySupport {
    /// Create a dialect; `ddl_transactions` decides the failure path.
    pub fn new(ddl_transactions: bool) -> Self {
        Self { ddl_transactions }
    }
}

impl Default for InMemorySupport {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl DbSupport for InMemorySupport {
    fn name(&self) -> &str {
        "memory"
    }

    fn supports_ddl_transactions(&self) -> bool {
        self.ddl_transactions
    }

    fn quote(&self, parts: &[&str]) -> String {
        quote_with('"', parts)
    }

    async fn current_schema(&self, _conn: &dyn SqlExecutor) -> MigrateResult<String> {
        Ok("memory".to_string())
    }

    async fn current_user(&self, _conn: &dyn SqlExecutor) -> MigrateResult<String> {
        Ok("memory".to_string())
    }
}
