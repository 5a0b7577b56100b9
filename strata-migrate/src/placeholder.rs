//! Placeholder substitution in script content.

use std::collections::{BTreeMap, BTreeSet};

use regex_lite::Regex;

use crate::error::{MigrateResult, MigrationError};

/// Replaces `${name}` style placeholders with configured values.
#[derive(Debug, Clone)]
pub struct PlaceholderReplacer {
    values: BTreeMap<String, String>,
    pattern: Regex,
}

impl PlaceholderReplacer {
    /// Create a replacer using the default `${` / `}` delimiters.
    pub fn new(values: BTreeMap<String, String>) -> MigrateResult<Self> {
        Self::with_delimiters(values, "${", "}")
    }

    /// Create a replacer with custom delimiters.
    pub fn with_delimiters(
        values: BTreeMap<String, String>,
        prefix: &str,
        suffix: &str,
    ) -> MigrateResult<Self> {
        if prefix.is_empty() || suffix.is_empty() {
            return Err(MigrationError::configuration(
                "placeholder prefix and suffix must not be empty",
            ));
        }
        let source = format!(
            "{}([A-Za-z0-9_.:-]+){}",
            regex_lite::escape(prefix),
            regex_lite::escape(suffix)
        );
        let pattern = Regex::new(&source)
            .map_err(|e| MigrationError::configuration(format!("invalid placeholder delimiters: {}", e)))?;
        Ok(Self { values, pattern })
    }

    /// Replace every placeholder in `text`.
    ///
    /// Fails listing every placeholder that has no value.
    pub fn replace(&self, text: &str) -> MigrateResult<String> {
        let mut unresolved = BTreeSet::new();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for caps in self.pattern.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            match self.values.get(name.as_str()) {
                Some(value) => out.push_str(value),
                None => {
                    unresolved.insert(name.as_str().to_string());
                    out.push_str(whole.as_str());
                }
            }
            last = whole.end();
        }
        out.push_str(&text[last..]);

        if !unresolved.is_empty() {
            let names: Vec<_> = unresolved.into_iter().collect();
            return Err(MigrationError::placeholder(format!(
                "No value provided for placeholder expressions: {}. Check your configuration!",
                names.join(", ")
            )));
        }
        Ok(out)
    }

    /// Configured placeholder values.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}
