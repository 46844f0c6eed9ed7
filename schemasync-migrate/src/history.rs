//! Migration history tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MigrateResult;
use crate::file::MigrationFile;
use crate::sql::quote_ident;

/// Default name of the tracking table.
pub const DEFAULT_TRACKING_TABLE: &str = "schema_migrations";

/// Key for `pg_advisory_xact_lock` held while a version is recorded.
pub const MIGRATION_LOCK_KEY: i64 = 0x5343_4D53_594E_43; // "SCMSYNC"

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration version (primary key).
    pub version: String,
    /// Migration name.
    pub name: String,
    /// File name at the time it was applied.
    pub filename: String,
    /// Checksum of the file at the time it was applied.
    pub checksum: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// Database role that applied it.
    pub applied_by: String,
    /// Execution time; `None` for versions recorded with `mark`.
    pub execution_ms: Option<i32>,
}

/// Migration history repository.
///
/// Implementations must make [`MigrationStore::apply`] atomic: the record
/// exists if and only if the file's SQL committed.
#[async_trait::async_trait]
pub trait MigrationStore: Send + Sync {
    /// Create the tracking table if it does not exist.
    async fn initialize(&self) -> MigrateResult<()>;

    /// All records, ordered by version. Must not write.
    async fn applied(&self) -> MigrateResult<Vec<MigrationRecord>>;

    /// Execute the file and record it in one transaction.
    async fn apply(&self, file: &MigrationFile) -> MigrateResult<MigrationRecord>;

    /// Record the file without executing it.
    async fn mark(&self, file: &MigrationFile) -> MigrateResult<MigrationRecord>;
}

/// SQL statements for a tracking table with a given name.
#[derive(Debug, Clone)]
pub struct TrackingTable {
    name: String,
}

impl Default for TrackingTable {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKING_TABLE)
    }
}

impl TrackingTable {
    /// Use the table `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Unquoted table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CREATE TABLE statement.
    pub fn create_sql(&self) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    version TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    filename TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    applied_by TEXT NOT NULL DEFAULT current_user,
    execution_ms INTEGER
)"#,
            quote_ident(&self.name)
        )
    }

    /// Query returning the table's regclass, NULL when it does not exist. Takes the name as `$1`.
    pub fn exists_sql(&self) -> &'static str {
        "SELECT to_regclass($1)::text AS relation"
    }

    /// The name as passed to `to_regclass`.
    pub fn regclass_name(&self) -> String {
        quote_ident(&self.name)
    }

    /// SELECT of all records.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT version, name, filename, checksum, applied_at, applied_by, execution_ms FROM {} ORDER BY version",
            quote_ident(&self.name)
        )
    }

    /// INSERT of one record returning the server-assigned columns.
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, name, filename, checksum, execution_ms) VALUES ($1, $2, $3, $4, $5) RETURNING applied_at, applied_by",
            quote_ident(&self.name)
        )
    }
}
