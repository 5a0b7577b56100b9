//! Locations and resource scanning.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MigrateResult, MigrationError};

/// A source of migrations: `filesystem:<dir>` or `registry:<name>`.
///
/// A location without a scheme is a filesystem directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A directory of script files.
    FileSystem(PathBuf),
    /// A named set of programmatic migrations.
    Registry(String),
}

impl Location {
    /// Parse a location string.
    pub fn parse(raw: &str) -> MigrateResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MigrationError::configuration("empty migration location"));
        }
        if let Some(path) = raw.strip_prefix("filesystem:") {
            return Ok(Self::FileSystem(PathBuf::from(path)));
        }
        if let Some(name) = raw.strip_prefix("registry:") {
            if name.is_empty() {
                return Err(MigrationError::configuration(
                    "registry location needs a name",
                ));
            }
            return Ok(Self::Registry(name.to_string()));
        }
        if let Some((scheme, _)) = raw.split_once(':') {
            // Windows drive letters are a single character.
            if scheme.len() > 1 {
                return Err(MigrationError::configuration(format!(
                    "unknown location scheme '{}' in '{}'",
                    scheme, raw
                )));
            }
        }
        Ok(Self::FileSystem(PathBuf::from(raw)))
    }

    /// Shorthand for a filesystem location.
    pub fn filesystem(path: impl Into<PathBuf>) -> Self {
        Self::FileSystem(path.into())
    }

    /// Shorthand for a registry location.
    pub fn registry(name: impl Into<String>) -> Self {
        Self::Registry(name.into())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileSystem(path) => write!(f, "filesystem:{}", path.display()),
            Self::Registry(name) => write!(f, "registry:{}", name),
        }
    }
}

impl FromStr for Location {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A script file found by a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Path relative to the location root, `/`-separated.
    pub relative_path: String,
    /// Bare file name.
    pub file_name: String,
    /// Absolute or location-joined path, for diagnostics.
    pub physical_path: PathBuf,
    /// File content.
    pub content: String,
}

/// Enumerates resources under a location.
#[async_trait]
pub trait ResourceScanner: Send + Sync {
    /// Resources whose file name starts with one of `prefixes` and ends with one
    /// of `suffixes`, sorted by relative path. Foreign or absent locations
    /// yield nothing.
    async fn scan(
        &self,
        location: &Location,
        prefixes: &[String],
        suffixes: &[String],
    ) -> MigrateResult<Vec<Resource>>;
}

/// Walks filesystem locations with `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemScanner;

impl FileSystemScanner {
    /// Create a new scanner.
    pub fn new() -> Self {
        Self
    }

    async fn walk(root: &Path) -> MigrateResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }

        Ok(files)
    }
}

fn matches_convention(file_name: &str, prefixes: &[String], suffixes: &[String]) -> bool {
    prefixes.iter().any(|p| file_name.starts_with(p.as_str()))
        && suffixes
            .iter()
            .any(|s| file_name.len() > s.len() && file_name.ends_with(s.as_str()))
}

#[async_trait]
impl ResourceScanner for FileSystemScanner {
    async fn scan(
        &self,
        location: &Location,
        prefixes: &[String],
        suffixes: &[String],
    ) -> MigrateResult<Vec<Resource>> {
        let Location::FileSystem(root) = location else {
            return Ok(Vec::new());
        };

        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            tracing::debug!(location = %location, "migration location does not exist, skipping");
            return Ok(Vec::new());
        }

        let mut resources = Vec::new();
        for path in Self::walk(root).await? {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !matches_convention(file_name, prefixes, suffixes) {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(&path);
            let relative_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let content = tokio::fs::read_to_string(&path).await?;
            resources.push(Resource {
                relative_path,
                file_name: file_name.to_string(),
                physical_path: path.clone(),
                content,
            });
        }

        resources.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        tracing::debug!(location = %location, count = resources.len(), "scanned location");
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> (Vec<String>, Vec<String>) {
        (
            vec!["V".to_string(), "R".to_string()],
            vec![".sql".to_string()],
        )
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(
            Location::parse("filesystem:db/migrations").unwrap(),
            Location::filesystem("db/migrations")
        );
        assert_eq!(
            Location::parse("db/migrations").unwrap(),
            Location::filesystem("db/migrations")
        );
        assert_eq!(
            Location::parse("registry:core").unwrap(),
            Location::registry("core")
        );
        assert!(Location::parse("s3:bucket/path").is_err());
        assert!(Location::parse("registry:").is_err());
        assert_eq!(Location::registry("core").to_string(), "registry:core");
    }

    #[tokio::test]
    async fn test_scan_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("V2__b.sql"), "SELECT 2;").unwrap();
        std::fs::write(nested.join("V1__a.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        std::fs::write(dir.path().join("V3__c.txt"), "ignored").unwrap();

        let (prefixes, suffixes) = conv();
        let resources = FileSystemScanner::new()
            .scan(&Location::filesystem(dir.path()), &prefixes, &suffixes)
            .await
            .unwrap();

        let paths: Vec<_> = resources.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["V2__b.sql", "nested/V1__a.sql"]);
        assert_eq!(resources[1].file_name, "V1__a.sql");
        assert_eq!(resources[1].content, "SELECT 1;");
    }

    #[tokio::test]
    async fn test_scan_absent_or_foreign_location_is_empty() {
        let (prefixes, suffixes) = conv();
        let scanner = FileSystemScanner::new();

        let absent = scanner
            .scan(
                &Location::filesystem("/definitely/not/here/strata"),
                &prefixes,
                &suffixes,
            )
            .await
            .unwrap();
        assert!(absent.is_empty());

        let foreign = scanner
            .scan(&Location::registry("core"), &prefixes, &suffixes)
            .await
            .unwrap();
        assert!(foreign.is_empty());
    }
}
