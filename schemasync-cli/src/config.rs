//! CLI configuration handling.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;
use schemasync_migrate::{DEFAULT_TRACKING_TABLE, SkipList};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Default config file name (lives in the project root)
pub const CONFIG_FILE_NAME: &str = "schemasync.toml";

/// Default migrations directory (relative to the project root)
pub const MIGRATIONS_DIR: &str = "migrations";

/// Default directory for generated sync SQL
pub const SYNC_OUTPUT_DIR: &str = "schema-sync";

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// schemasync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-environment connection settings
    pub environments: EnvironmentsConfig,

    /// Migration runner settings
    pub migrations: MigrationsConfig,

    /// Settings applied to every connection
    pub connection: ConnectionConfig,

    /// Schema sync settings
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration text, expanding `${VAR}` references first.
    pub fn parse(content: &str) -> CliResult<Self> {
        let expanded = expand_env_vars(content, |name| std::env::var(name).ok());
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Load `explicit` if given (it must exist), else `./schemasync.toml`
    /// when present, else defaults.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> CliResult<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = cwd.join(CONFIG_FILE_NAME);
                if default.is_file() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Skip list for the differ.
    pub fn skip_list(&self) -> SkipList {
        let base = if self.sync.include_default_skips {
            SkipList::default().table(self.migrations.table.clone())
        } else {
            SkipList::empty()
        };
        base.tables(self.sync.skip_tables.iter().cloned())
            .functions(self.sync.skip_functions.iter().cloned())
    }
}

/// Connection strings, one per environment, never shared
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentsConfig {
    /// Development database
    pub development: EnvironmentConfig,

    /// Production database
    pub production: EnvironmentConfig,
}

/// One environment's settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Database connection URL
    pub url: Option<String>,
}

/// Migration runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory for migration files
    pub directory: PathBuf,

    /// Tracking table name
    pub table: String,

    /// Refuse to run while an applied file has been modified
    pub strict_checksums: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(MIGRATIONS_DIR),
            table: DEFAULT_TRACKING_TABLE.to_string(),
            strict_checksums: false,
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Statement timeout in milliseconds
    pub statement_timeout_ms: u64,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    /// Statement timeout as a duration.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Schema sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Schema namespace to compare
    pub schema: String,

    /// Output directory for generated SQL
    pub output: PathBuf,

    /// Extra tables excluded from the diff
    pub skip_tables: Vec<String>,

    /// Extra functions excluded from the diff
    pub skip_functions: Vec<String>,

    /// Also skip the tracking table and `spatial_ref_sys`
    pub include_default_skips: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            output: PathBuf::from(SYNC_OUTPUT_DIR),
            skip_tables: Vec::new(),
            skip_functions: Vec::new(),
            include_default_skips: true,
        }
    }
}

/// Expand `${VAR_NAME}` references. Unset variables are left as written.
pub fn expand_env_vars(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_VAR
        .replace_all(content, |caps: &regex_lite::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.migrations.directory, PathBuf::from("migrations"));
        assert_eq!(config.migrations.table, "schema_migrations");
        assert_eq!(config.connection.statement_timeout(), Duration::from_secs(60));
        assert_eq!(config.sync.schema, "public");
        assert!(config.environments.production.url.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            r#"
            [environments.development]
            url = "postgresql://dev@localhost/app"

            [environments.production]
            url = "postgresql://postgres.abcd@pooler.example.com:6543/postgres"

            [migrations]
            directory = "db/migrations"
            table = "applied_migrations"
            strict_checksums = true

            [connection]
            statement_timeout_ms = 5000

            [sync]
            schema = "app"
            skip_tables = ["orders_backup"]
            skip_functions = ["debug_dump"]
            "#,
        )
        .unwrap();

        assert_eq!(config.migrations.directory, PathBuf::from("db/migrations"));
        assert!(config.migrations.strict_checksums);
        assert_eq!(config.connection.statement_timeout_ms, 5000);
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert_eq!(config.sync.schema, "app");

        let skip = config.skip_list();
        assert!(skip.skips_table("orders_backup"));
        assert!(skip.skips_table("applied_migrations"));
        assert!(skip.skips_table("spatial_ref_sys"));
        assert!(skip.skips_function("debug_dump"));
    }

    #[test]
    fn test_default_skips_can_be_disabled() {
        let config = Config::parse("[sync]\ninclude_default_skips = false\n").unwrap();
        assert!(!config.skip_list().skips_table("spatial_ref_sys"));
    }

    #[test]
    fn test_env_var_expansion() {
        let lookup = |name: &str| (name == "PROD_URL").then(|| "postgresql://prod/db".to_string());
        assert_eq!(
            expand_env_vars(r#"url = "${PROD_URL}""#, lookup),
            r#"url = "postgresql://prod/db""#
        );
        assert_eq!(
            expand_env_vars(r#"url = "${MISSING}""#, lookup),
            r#"url = "${MISSING}""#
        );
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::parse("[migrations\n").unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_discover_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::discover(Some(&dir.path().join("nope.toml")), dir.path()).is_err());
        assert!(Config::discover(None, dir.path()).is_ok());
    }
}
