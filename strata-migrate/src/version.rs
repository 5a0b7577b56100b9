//! Schema versions.
//!
//! A [`VersionKey`] is a dotted sequence of non-negative integers such as
//! `1.2.3`. Underscores are accepted as separators (`1_2_3`) so versions can
//! be embedded in file names. Two sentinels bracket every concrete version:
//! [`VersionKey::EMPTY`] sorts below everything and [`VersionKey::LATEST`]
//! sorts above everything.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MigrateResult, MigrationError};

/// A totally ordered schema version.
#[derive(Debug, Clone)]
pub struct VersionKey(Repr);

#[derive(Debug, Clone)]
enum Repr {
    Empty,
    Parts { parts: Vec<u64>, text: String },
    Latest,
}

impl VersionKey {
    /// The version of a schema that has never been migrated.
    pub const EMPTY: VersionKey = VersionKey(Repr::Empty);

    /// Above every concrete version; used as the default migration target.
    pub const LATEST: VersionKey = VersionKey(Repr::Latest);

    /// Parse a version string such as `1.2.3` or `1_2_3`.
    ///
    /// `latest` (in any case) yields [`VersionKey::LATEST`].
    pub fn parse(input: &str) -> MigrateResult<Self> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(Self::LATEST);
        }
        if trimmed.is_empty() {
            return Err(MigrationError::invalid_version(input, "version is empty"));
        }

        let text = trimmed.replace('_', ".");
        if text.starts_with('.') {
            return Err(MigrationError::invalid_version(
                input,
                "version must not begin with a separator",
            ));
        }

        let mut parts = Vec::new();
        for part in text.split('.') {
            if part.is_empty() {
                return Err(MigrationError::invalid_version(
                    input,
                    "empty version component",
                ));
            }
            if !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(MigrationError::invalid_version(
                    input,
                    format!(
                        "non-numeric component '{}'; only 0..9 and . are allowed",
                        part
                    ),
                ));
            }
            let value = part.parse::<u64>().map_err(|_| {
                MigrationError::invalid_version(input, format!("component '{}' is too large", part))
            })?;
            parts.push(value);
        }

        // Trailing zeros never change ordering; dropping them keeps Eq and Hash aligned.
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }

        Ok(Self(Repr::Parts { parts, text }))
    }

    /// A single-component version such as `1`.
    pub fn major(major: u64) -> Self {
        Self(Repr::Parts {
            parts: vec![major],
            text: major.to_string(),
        })
    }

    /// Whether this is the [`VersionKey::EMPTY`] sentinel.
    pub fn is_empty(&self) -> bool {
        matches!(self.0, Repr::Empty)
    }

    /// Whether this is the [`VersionKey::LATEST`] sentinel.
    pub fn is_latest(&self) -> bool {
        matches!(self.0, Repr::Latest)
    }

    /// Numeric components, or `None` for a sentinel.
    pub fn parts(&self) -> Option<&[u64]> {
        match &self.0 {
            Repr::Parts { parts, .. } => Some(parts),
            _ => None,
        }
    }

    /// The normalized, dotted text of a concrete version.
    ///
    /// Sentinels have no storable text and return `None`.
    pub fn as_text(&self) -> Option<&str> {
        match &self.0 {
            Repr::Parts { text, .. } => Some(text),
            _ => None,
        }
    }
}

fn compare_parts(left: &[u64], right: &[u64]) -> Ordering {
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Repr::Empty, Repr::Empty) | (Repr::Latest, Repr::Latest) => Ordering::Equal,
            (Repr::Empty, _) | (_, Repr::Latest) => Ordering::Less,
            (_, Repr::Empty) | (Repr::Latest, _) => Ordering::Greater,
            (Repr::Parts { parts: left, .. }, Repr::Parts { parts: right, .. }) => {
                compare_parts(left, right)
            }
        }
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionKey {}

impl Hash for VersionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Repr::Empty => 0u8.hash(state),
            Repr::Latest => 1u8.hash(state),
            Repr::Parts { parts, .. } => {
                2u8.hash(state);
                parts.hash(state);
            }
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Empty => write!(f, "<< Empty Schema >>"),
            Repr::Latest => write!(f, "<< Latest Version >>"),
            Repr::Parts { text, .. } => write!(f, "{}", text),
        }
    }
}

impl FromStr for VersionKey {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Default for VersionKey {
    fn default() -> Self {
        Self::LATEST
    }
}

impl Serialize for VersionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Repr::Latest => serializer.serialize_str("latest"),
            Repr::Empty => serializer.serialize_none(),
            Repr::Parts { text, .. } => serializer.serialize_str(text),
        }
    }
}

impl<'de> Deserialize<'de> for VersionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(Self::EMPTY),
            Some(text) => Self::parse(&text).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionKey {
        VersionKey::parse(s).unwrap()
    }

    #[test]
    fn test_sentinel_ordering() {
        assert!(VersionKey::EMPTY < v("0.1"));
        assert!(v("0.1") < v("1.0"));
        assert!(v("1.0") < VersionKey::LATEST);
        assert!(VersionKey::EMPTY < VersionKey::LATEST);
        assert_eq!(VersionKey::EMPTY, VersionKey::EMPTY);
        assert_eq!(VersionKey::LATEST, VersionKey::LATEST);
    }

    #[test]
    fn test_major_matches_parsed() {
        assert_eq!(VersionKey::major(1), v("1"));
        assert_eq!(VersionKey::major(0), v("0.0"));
        assert_eq!(VersionKey::major(3).to_string(), "3");
        assert_eq!(VersionKey::major(3).as_text(), Some("3"));
    }

    #[test]
    fn test_underscore_normalization() {
        assert_eq!(v("1.2"), v("1_2"));
        assert_eq!(v("1_2").to_string(), "1.2");
    }

    #[test]
    fn test_trailing_zeros_are_equal() {
        assert_eq!(v("1"), v("1.0"));
        assert_eq!(v("1.0.0"), v("1"));

        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(v("1.0"));
        assert!(set.contains(&v("1")));
    }

    #[test]
    fn test_componentwise_comparison() {
        assert!(v("1.2") < v("1.10"));
        assert!(v("1.2.1") > v("1.2"));
        assert!(v("2") > v("1.999"));
        assert!(v("20240101120000") > v("20231231235959"));
    }

    #[test]
    fn test_leading_zeros_keep_text() {
        let version = v("009_4");
        assert_eq!(version.to_string(), "009.4");
        assert_eq!(version, v("9.4"));
    }

    #[test]
    fn test_invalid_versions() {
        assert!(VersionKey::parse("").is_err());
        assert!(VersionKey::parse("_8_0").is_err());
        assert!(VersionKey::parse(".1").is_err());
        assert!(VersionKey::parse("1.a").is_err());
        assert!(VersionKey::parse("1..2").is_err());
        assert!(VersionKey::parse("1.").is_err());
        assert!(VersionKey::parse("99999999999999999999999").is_err());
    }

    #[test]
    fn test_latest_keyword() {
        assert!(v("latest").is_latest());
        assert!(v("LATEST").is_latest());
        assert_eq!(VersionKey::default(), VersionKey::LATEST);
    }

    #[test]
    fn test_serde_round_trip_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            target: VersionKey,
        }

        let parsed: Wrapper = toml::from_str("target = \"1_5\"").unwrap();
        assert_eq!(parsed.target, v("1.5"));

        let latest: Wrapper = toml::from_str("target = \"latest\"").unwrap();
        assert!(latest.target.is_latest());
        assert_eq!(toml::to_string(&latest).unwrap().trim(), "target = \"latest\"");
    }

    #[test]
    fn test_text_accessors() {
        assert_eq!(v("3.1").as_text(), Some("3.1"));
        assert_eq!(VersionKey::EMPTY.as_text(), None);
        assert_eq!(v("3.1").parts(), Some(&[3u64, 1][..]));
    }
}
