//! Logging setup for the CLI.
//!
//! # Environment Variables
//!
//! - `STRATA_LOG=debug` - Log level or full `EnvFilter` directive (default: `warn`)
//! - `STRATA_LOG_FORMAT=pretty|compact|json` - Output format (default: `compact`)
//!
//! Logs go to stderr so command output on stdout stays clean.

use std::env;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Get the filter directive from `STRATA_LOG`.
///
/// A bare level applies to the Strata crates only.
pub fn get_log_filter() -> String {
    match env::var("STRATA_LOG") {
        Ok(value) if !value.trim().is_empty() => {
            let value = value.trim().to_lowercase();
            if matches!(value.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off") {
                format!(
                    "warn,strata={0},strata_cli={0},strata_migrate={0},strata_sqlite={0}",
                    value
                )
            } else {
                value
            }
        }
        _ => "warn".to_string(),
    }
}

/// Get the configured log format from `STRATA_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    env::var("STRATA_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "json" => "json",
            _ => "compact",
        })
        .unwrap_or("compact")
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_new(get_log_filter()).unwrap_or_else(|_| EnvFilter::new("warn"));

    let installed = match get_log_format() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(format = get_log_format(), "Strata logging initialized");
    }
}
