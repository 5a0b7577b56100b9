//! CLI configuration handling.
//!
//! `strata.toml` holds a `[database]` table, a `[migrations]` table with the
//! engine settings, and optional `[environments.<name>]` tables whose
//! contents are merged over the top level when that environment is selected:
//!
//! ```toml
//! [database]
//! url = "sqlite://${DATA_DIR}/app.db"
//!
//! [migrations]
//! locations = ["filesystem:db/migrations"]
//!
//! [environments.ci.migrations]
//! out_of_order = true
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::Deserialize;
use strata_migrate::MigrationConfig;

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Strata CLI configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Migration engine configuration
    pub migrations: MigrationConfig,
}

/// Database configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL; `${VAR}` references are expanded
    pub url: Option<String>,
}

impl Config {
    /// The database URL with environment references expanded.
    pub fn database_url(&self) -> CliResult<Option<String>> {
        self.database.url.as_deref().map(expand_env).transpose()
    }
}

/// Loads `strata.toml` and resolves environments on demand.
///
/// Resolved environments are cached by name until [`invalidate`](Self::invalidate).
#[derive(Debug)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    raw: toml::Table,
    cache: HashMap<Option<String>, Config>,
}

impl ConfigLoader {
    /// Read the file at `path`.
    ///
    /// Without an explicit path, `./strata.toml` is used if it exists and
    /// built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let path = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::Config(format!(
                        "configuration file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => Some(PathBuf::from(CONFIG_FILE_NAME)).filter(|p| p.exists()),
        };

        let raw = match &path {
            Some(path) => read_table(path)?,
            None => toml::Table::new(),
        };
        Ok(Self {
            path,
            raw,
            cache: HashMap::new(),
        })
    }

    /// Build a loader from TOML text.
    pub fn parse(content: &str) -> CliResult<Self> {
        Ok(Self {
            path: None,
            raw: toml::from_str(content)?,
            cache: HashMap::new(),
        })
    }

    /// The file this loader reads, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Names of the environments defined in the file.
    pub fn environments(&self) -> Vec<String> {
        match self.raw.get("environments") {
            Some(toml::Value::Table(envs)) => envs.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Configuration for `env`, or the top level when `None`.
    pub fn resolve(&mut self, env: Option<&str>) -> CliResult<&Config> {
        let key = env.map(str::to_string);
        if !self.cache.contains_key(&key) {
            let config = self.build(env)?;
            tracing::debug!(env = ?env, "resolved configuration");
            self.cache.insert(key.clone(), config);
        }
        self.cache
            .get(&key)
            .ok_or_else(|| CliError::Config("configuration cache is inconsistent".to_string()))
    }

    /// Drop cached environments and re-read the file.
    pub fn invalidate(&mut self) -> CliResult<()> {
        self.cache.clear();
        if let Some(path) = &self.path {
            self.raw = read_table(path)?;
        }
        Ok(())
    }

    fn build(&self, env: Option<&str>) -> CliResult<Config> {
        let mut merged = self.raw.clone();
        merged.remove("environments");

        if let Some(name) = env {
            let overrides = self
                .raw
                .get("environments")
                .and_then(|envs| envs.get(name))
                .and_then(|v| v.as_table())
                .ok_or_else(|| {
                    CliError::Config(format!(
                        "unknown environment '{}' (defined: {})",
                        name,
                        self.environments().join(", ")
                    ))
                })?;
            merge(&mut merged, overrides);
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }
}

fn read_table(path: &Path) -> CliResult<toml::Table> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Merge `overrides` into `base`, recursing into nested tables.
fn merge(base: &mut toml::Table, overrides: &toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Replace `${VAR}` with the value of the environment variable `VAR`.
pub fn expand_env(text: &str) -> CliResult<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| CliError::Config(format!("invalid expansion pattern: {}", e)))?;

    let mut missing = Vec::new();
    let expanded = pattern.replace_all(text, |caps: &regex_lite::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(CliError::Config(format!(
            "environment variable(s) not set: {}",
            missing.join(", ")
        )));
    }
    Ok(expanded.into_owned())
}
