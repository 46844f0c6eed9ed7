//! CLI error types and result alias.

use miette::Diagnostic;
use schemasync_migrate::MigrationError;
use schemasync_postgres::PgError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(schemasync::io))]
    Io(#[from] std::io::Error),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(schemasync::config),
        help("Connection strings come from schemasync.toml or SCHEMASYNC_DEV_DATABASE_URL / SCHEMASYNC_PROD_DATABASE_URL")
    )]
    Config(String),

    /// Migration or sync engine error
    #[error(transparent)]
    #[diagnostic(code(schemasync::migration))]
    Migration(#[from] MigrationError),

    /// Database connection error
    #[error("Database error: {0}")]
    #[diagnostic(code(schemasync::database))]
    Database(#[from] PgError),

    /// A migration failed and was rolled back
    #[error("Migration {version} failed and was rolled back")]
    #[diagnostic(
        code(schemasync::migration_failed),
        help("Fix the file and rerun; later migrations were not attempted")
    )]
    MigrationFailed {
        /// Failed version.
        version: String,
    },

    /// Operator declined the production confirmation
    #[error("Aborted: {0}")]
    #[diagnostic(code(schemasync::aborted))]
    Aborted(String),

    /// Invalid combination of arguments
    #[error("{0}")]
    #[diagnostic(code(schemasync::usage))]
    Usage(String),
}

impl CliError {
    /// Process exit code: 2 for operator mistakes, 1 for failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Usage(_) | Self::Aborted(_) => 2,
            Self::Migration(e) if e.is_usage_error() => 2,
            _ => 1,
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("missing".into()).exit_code(), 2);
        assert_eq!(
            CliError::Migration(MigrationError::NotFound("070".into())).exit_code(),
            2
        );
        assert_eq!(
            CliError::MigrationFailed {
                version: "070".into()
            }
            .exit_code(),
            1
        );
    }
}
