//! Error types for the synchronization and migration engine.

use schemasync_postgres::{DbErrorContext, PgError};
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during introspection or migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database operation error outside of a migration file.
    #[error("Database error: {0}")]
    Database(#[from] PgError),

    /// A catalog query failed; the snapshot for this environment is unusable.
    #[error("Introspection of '{environment}' failed: {source}")]
    Introspection {
        /// Environment label.
        environment: String,
        /// Underlying error.
        #[source]
        source: PgError,
    },

    /// A catalog row held a value the introspector does not understand.
    #[error("Unexpected catalog value in '{environment}': {message}")]
    Catalog {
        /// Environment label.
        environment: String,
        /// Description of the value.
        message: String,
    },

    /// A migration file's SQL failed; its transaction was rolled back.
    #[error("Migration '{version}' failed: {context}")]
    Execution {
        /// Migration version.
        version: String,
        /// Server-reported error fields.
        context: DbErrorContext,
    },

    /// Invalid migration file or directory layout.
    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    /// Migration checksum mismatch.
    #[error("Checksum mismatch for migration '{version}': recorded {expected}, file has {actual}")]
    ChecksumMismatch {
        /// Migration version.
        version: String,
        /// Recorded checksum.
        expected: String,
        /// Checksum of the file on disk.
        actual: String,
    },

    /// Migration already applied.
    #[error("Migration '{0}' has already been applied")]
    AlreadyApplied(String),

    /// Migration not found.
    #[error("Migration '{0}' not found")]
    NotFound(String),
}

impl MigrationError {
    /// Create an introspection error for an environment.
    pub fn introspection(environment: impl Into<String>, source: PgError) -> Self {
        Self::Introspection {
            environment: environment.into(),
            source,
        }
    }

    /// Create a catalog decoding error for an environment.
    pub fn catalog(environment: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Catalog {
            environment: environment.into(),
            message: message.into(),
        }
    }

    /// Create an invalid migration error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidMigration(msg.into())
    }

    /// Build an execution error from a driver error raised while running a file.
    pub fn execution(version: impl Into<String>, err: PgError) -> Self {
        let context = err.db_context().unwrap_or_else(|| DbErrorContext {
            message: err.to_string(),
            ..Default::default()
        });
        Self::Execution {
            version: version.into(),
            context,
        }
    }

    /// Operator mistakes (unknown or already-applied versions) rather than failures.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::AlreadyApplied(_) | Self::NotFound(_))
    }
}
