//! SQLite dialect capabilities.

use async_trait::async_trait;
use strata_migrate::dialect::{quote_with, row_str};
use strata_migrate::{DbSupport, MigrateResult, SqlExecutor};

/// [`DbSupport`] for SQLite.
///
/// SQLite runs DDL inside transactions, so a failed migration leaves no trace.
#[derive(Debug, Clone, Default)]
pub struct SqliteSupport {
    user: Option<String>,
}

impl SqliteSupport {
    /// Create the dialect.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `user` as the installing user.
    ///
    /// SQLite has no accounts; without this the operating system user is used.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

#[async_trait]
impl DbSupport for SqliteSupport {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn supports_ddl_transactions(&self) -> bool {
        true
    }

    fn quote(&self, parts: &[&str]) -> String {
        quote_with('"', parts)
    }

    async fn current_schema(&self, conn: &dyn SqlExecutor) -> MigrateResult<String> {
        let rows = conn.query("PRAGMA database_list").await?;
        Ok(rows
            .iter()
            .find_map(|row| row_str(row, "name"))
            .unwrap_or_else(|| "main".to_string()))
    }

    async fn current_user(&self, _conn: &dyn SqlExecutor) -> MigrateResult<String> {
        if let Some(user) = &self.user {
            return Ok(user.clone());
        }
        Ok(std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "sqlite".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SqliteConfig, SqliteConnection};

    #[test]
    fn test_quote() {
        let support = SqliteSupport::new();
        assert_eq!(support.quote(&["strata_schema_history"]), "\"strata_schema_history\"");
        assert_eq!(support.quote(&["main", "t"]), "\"main\".\"t\"");
        assert!(support.supports_ddl_transactions());
    }

    #[tokio::test]
    async fn test_current_schema_and_user() {
        let conn = SqliteConnection::open(&SqliteConfig::memory()).await.unwrap();
        let support = SqliteSupport::new().with_user("deployer");
        assert_eq!(support.current_schema(&conn).await.unwrap(), "main");
        assert_eq!(support.current_user(&conn).await.unwrap(), "deployer");
    }
}
