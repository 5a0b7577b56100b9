//! Lifecycle callbacks.
//!
//! A [`Callback`] is told about every [`Event`] of the engine's commands and
//! may run SQL of its own through the connection in the [`CallbackContext`].
//! `Before*` and `After*` failures abort the command; failures while handling
//! an `*Error` event are logged so the original error is the one reported.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::dialect::SqlExecutor;
use crate::error::MigrateResult;
use crate::migration::MigrationUnit;

/// A point in the lifecycle of an engine command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Before `migrate` takes the lock for the first time.
    BeforeMigrate,
    /// Before a migration runs, inside its transaction.
    BeforeEachMigrate,
    /// After a migration succeeded, inside its transaction.
    AfterEachMigrate,
    /// After a migration failed.
    AfterEachMigrateError,
    /// Once the versioned migrations of a run are done.
    AfterVersioned,
    /// Before the first repeatable migration of a run.
    BeforeRepeatables,
    /// After `migrate` succeeded.
    AfterMigrate,
    /// After `migrate` failed.
    AfterMigrateError,
    /// Before `validate`.
    BeforeValidate,
    /// After `validate` succeeded.
    AfterValidate,
    /// After `validate` failed.
    AfterValidateError,
    /// Before `baseline`.
    BeforeBaseline,
    /// After `baseline` succeeded.
    AfterBaseline,
    /// After `baseline` failed.
    AfterBaselineError,
    /// Before `repair`.
    BeforeRepair,
    /// After `repair` succeeded.
    AfterRepair,
    /// After `repair` failed.
    AfterRepairError,
    /// Before `info`.
    BeforeInfo,
    /// After `info` succeeded.
    AfterInfo,
    /// After `info` failed.
    AfterInfoError,
}

impl Event {
    /// Camel-case name, as used for callback script names (`beforeMigrate`).
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeforeMigrate => "beforeMigrate",
            Self::BeforeEachMigrate => "beforeEachMigrate",
            Self::AfterEachMigrate => "afterEachMigrate",
            Self::AfterEachMigrateError => "afterEachMigrateError",
            Self::AfterVersioned => "afterVersioned",
            Self::BeforeRepeatables => "beforeRepeatables",
            Self::AfterMigrate => "afterMigrate",
            Self::AfterMigrateError => "afterMigrateError",
            Self::BeforeValidate => "beforeValidate",
            Self::AfterValidate => "afterValidate",
            Self::AfterValidateError => "afterValidateError",
            Self::BeforeBaseline => "beforeBaseline",
            Self::AfterBaseline => "afterBaseline",
            Self::AfterBaselineError => "afterBaselineError",
            Self::BeforeRepair => "beforeRepair",
            Self::AfterRepair => "afterRepair",
            Self::AfterRepairError => "afterRepairError",
            Self::BeforeInfo => "beforeInfo",
            Self::AfterInfo => "afterInfo",
            Self::AfterInfoError => "afterInfoError",
        }
    }

    /// Whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::AfterEachMigrateError
                | Self::AfterMigrateError
                | Self::AfterValidateError
                | Self::AfterBaselineError
                | Self::AfterRepairError
                | Self::AfterInfoError
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a callback gets to see.
pub struct CallbackContext<'a> {
    /// The event being handled.
    pub event: Event,
    /// Connection to run SQL on. For the `*EachMigrate` events this is inside
    /// the migration's transaction.
    pub connection: &'a dyn SqlExecutor,
    /// The migration concerned, for the `*EachMigrate*` events.
    pub migration: Option<&'a MigrationUnit>,
}

/// Hook into the engine's lifecycle.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Whether this callback wants `event`. Defaults to every event.
    fn supports(&self, event: Event) -> bool {
        let _ = event;
        true
    }

    /// Handle an event.
    async fn handle(&self, context: &CallbackContext<'_>) -> MigrateResult<()>;
}

/// Runs registered callbacks in registration order.
#[derive(Clone, Default)]
pub struct CallbackExecutor {
    callbacks: Vec<Arc<dyn Callback>>,
}

impl CallbackExecutor {
    /// Create an executor over `callbacks`.
    pub fn new(callbacks: Vec<Arc<dyn Callback>>) -> Self {
        Self { callbacks }
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Fire `event`, stopping at the first failing callback.
    ///
    /// Failures while handling an error event are logged and swallowed.
    pub async fn fire(
        &self,
        event: Event,
        connection: &dyn SqlExecutor,
        migration: Option<&MigrationUnit>,
    ) -> MigrateResult<()> {
        let context = CallbackContext {
            event,
            connection,
            migration,
        };
        for callback in self.callbacks.iter().filter(|c| c.supports(event)) {
            tracing::debug!(event = %event, "executing callback");
            if let Err(err) = callback.handle(&context).await {
                if event.is_error() {
                    tracing::warn!(event = %event, error = %err, "callback failed while handling an error");
                    continue;
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CallbackExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackExecutor")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
