//! Migration file discovery.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};

/// `{version}_{name}.sql` where version is three digits and an optional letter.
static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{3}[a-z]?)_(.+)\.sql$").expect("migration file name pattern is valid")
});

/// A migration file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Version (e.g. `069`, `060a`).
    pub version: String,
    /// Name part of the filename.
    pub name: String,
    /// File name including extension.
    pub filename: String,
    /// Path to the file.
    pub path: PathBuf,
    /// File contents.
    pub sql: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub checksum: String,
}

impl MigrationFile {
    /// Build a migration from a file name and its contents.
    pub fn from_contents(path: impl Into<PathBuf>, contents: &[u8]) -> MigrateResult<Self> {
        let path = path.into();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::invalid(format!("Invalid path: {}", path.display())))?
            .to_string();

        let (version, name) = parse_file_name(&filename).ok_or_else(|| {
            MigrationError::invalid(format!(
                "{} does not match {{version}}_{{name}}.sql",
                filename
            ))
        })?;

        let sql = std::str::from_utf8(contents)
            .map_err(|e| MigrationError::invalid(format!("{} is not valid UTF-8: {}", filename, e)))?
            .to_string();

        Ok(Self {
            version,
            name,
            filename,
            path,
            sql,
            checksum: compute_checksum(contents),
        })
    }
}

/// Split a migration file name into `(version, name)`.
pub fn parse_file_name(filename: &str) -> Option<(String, String)> {
    let caps = FILE_NAME.captures(filename)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Lowercase hex SHA-256 of `contents`.
pub fn compute_checksum(contents: &[u8]) -> String {
    hex::encode(Sha256::digest(contents))
}

/// A directory of numbered migration files.
#[derive(Debug, Clone)]
pub struct MigrationDirectory {
    dir: PathBuf,
}

impl MigrationDirectory {
    /// Create a handle on `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// List migration files sorted by file name.
    ///
    /// `.sql` files that do not follow the naming scheme are logged and
    /// skipped. Two files with the same version are an error.
    pub async fn discover(&self) -> MigrateResult<Vec<MigrationFile>> {
        if !tokio::fs::try_exists(&self.dir).await? {
            return Err(MigrationError::invalid(format!(
                "Migrations directory not found: {}",
                self.dir.display()
            )));
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            if !filename.ends_with(".sql") {
                continue;
            }
            if parse_file_name(&filename).is_none() {
                warn!(file = %filename, "Ignoring SQL file that does not match {{version}}_{{name}}.sql");
                continue;
            }
            paths.insert(filename, path);
        }

        let mut files: Vec<MigrationFile> = Vec::with_capacity(paths.len());
        for (filename, path) in paths {
            let contents = tokio::fs::read(&path).await?;
            let file = MigrationFile::from_contents(path, &contents)?;

            if let Some(existing) = files.iter().find(|f| f.version == file.version) {
                return Err(MigrationError::invalid(format!(
                    "Duplicate migration version {}: {} and {}",
                    file.version, existing.filename, filename
                )));
            }
            files.push(file);
        }

        debug!(dir = %self.dir.display(), count = files.len(), "Discovered migration files");
        Ok(files)
    }

    /// Find the file for one version.
    pub async fn find(&self, version: &str) -> MigrateResult<MigrationFile> {
        self.discover()
            .await?
            .into_iter()
            .find(|f| f.version == version)
            .ok_or_else(|| MigrationError::NotFound(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("069_add_dispatch_index.sql"),
            Some(("069".to_string(), "add_dispatch_index".to_string()))
        );
        assert_eq!(
            parse_file_name("060a_backfill.sql"),
            Some(("060a".to_string(), "backfill".to_string()))
        );
        assert_eq!(parse_file_name("69_short.sql"), None);
        assert_eq!(parse_file_name("069_no_extension"), None);
        assert_eq!(parse_file_name("069ab_two_letters.sql"), None);
        assert_eq!(parse_file_name("README.sql"), None);
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            compute_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        let a = compute_checksum(b"CREATE TABLE users();");
        assert_eq!(a, compute_checksum(b"CREATE TABLE users();"));
        assert_ne!(a, compute_checksum(b"CREATE TABLE users ();"));
    }

    #[tokio::test]
    async fn test_discover_orders_by_filename_and_skips_strays() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("070_second.sql"), "SELECT 2;").unwrap();
        std::fs::write(dir.path().join("060a_patch.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("069_first.sql"), "SELECT 0;").unwrap();
        std::fs::write(dir.path().join("notes.sql"), "-- scratch").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        std::fs::create_dir(dir.path().join("071_dir.sql")).unwrap();

        let files = MigrationDirectory::new(dir.path()).discover().await.unwrap();

        let versions: Vec<_> = files.iter().map(|f| f.version.as_str()).collect();
        assert_eq!(versions, vec!["060a", "069", "070"]);
        assert_eq!(files[1].name, "first");
        assert_eq!(files[1].sql, "SELECT 0;");
    }

    #[tokio::test]
    async fn test_duplicate_versions_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("070_a.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("070_b.sql"), "SELECT 2;").unwrap();

        let err = MigrationDirectory::new(dir.path()).discover().await.unwrap_err();
        assert!(err.to_string().contains("Duplicate migration version 070"));
    }

    #[tokio::test]
    async fn test_checksum_changes_with_one_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001_init.sql");
        std::fs::write(&path, "CREATE TABLE a (id int);").unwrap();

        let migrations = MigrationDirectory::new(dir.path());
        let before = migrations.find("001").await.unwrap().checksum;
        assert_eq!(before, migrations.find("001").await.unwrap().checksum);

        std::fs::write(&path, "CREATE TABLE a (id int); ").unwrap();
        let after = migrations.find("001").await.unwrap().checksum;
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_missing_directory_and_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let missing = MigrationDirectory::new(dir.path().join("nope"));
        assert!(missing.discover().await.is_err());

        let empty = MigrationDirectory::new(dir.path());
        assert!(matches!(
            empty.find("999").await,
            Err(MigrationError::NotFound(v)) if v == "999"
        ));
    }
}
