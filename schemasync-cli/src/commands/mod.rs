//! CLI command implementations.

pub mod mark;
pub mod run;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use schemasync_migrate::{
    MigrationDirectory, MigrationRunner, PgMigrationStore, RunnerOptions, TrackingTable,
};
use schemasync_postgres::{PgConfig, PgPool};
use tracing::debug;

use crate::cli::Cli;
use crate::config::Config;
use crate::environment::{self, Environment, ResolvedEnvironment};
use crate::error::CliResult;

/// State shared by every command.
#[derive(Debug)]
pub struct Context {
    /// Loaded configuration.
    pub config: Config,
    /// Environment selected with `--env`.
    pub environment: Environment,
    /// Directory relative paths are resolved against.
    pub cwd: PathBuf,
}

impl Context {
    /// Load the config file named on the command line, or the default one.
    pub fn load(cli: &Cli) -> CliResult<Self> {
        let cwd = std::env::current_dir()?;
        let config = Config::discover(cli.config.as_deref(), &cwd)?;
        Ok(Self {
            config,
            environment: cli.env,
            cwd,
        })
    }

    /// Resolve an environment's connection string.
    pub fn resolve(&self, environment: Environment) -> CliResult<ResolvedEnvironment> {
        environment::resolve(environment, &self.config, |name| std::env::var(name).ok())
    }

    /// Migrations directory, with `--dir` taking precedence.
    pub fn migrations_dir(&self, dir: Option<&Path>) -> PathBuf {
        self.cwd
            .join(dir.unwrap_or(self.config.migrations.directory.as_path()))
    }

    /// One-connection pool with the configured timeouts.
    pub async fn connect(&self, resolved: &ResolvedEnvironment) -> CliResult<PgPool> {
        let config = PgConfig::builder()
            .url(resolved.url.as_str())
            .statement_timeout(self.config.connection.statement_timeout())
            .connect_timeout(self.config.connection.connect_timeout())
            .application_name("schemasync")
            .build()?;

        let pool = PgPool::builder()
            .config(config)
            .max_connections(1)
            .build()
            .await?;
        debug!(environment = %resolved.label(), "Connection pool ready");
        Ok(pool)
    }

    /// Runner for the selected environment.
    pub async fn runner(
        &self,
        resolved: &ResolvedEnvironment,
        dir: Option<&Path>,
        strict: bool,
    ) -> CliResult<MigrationRunner<PgMigrationStore>> {
        let pool = self.connect(resolved).await?;
        let store =
            PgMigrationStore::with_table(pool, TrackingTable::new(self.config.migrations.table.as_str()));
        let options = RunnerOptions {
            strict_checksums: strict || self.config.migrations.strict_checksums,
        };
        Ok(MigrationRunner::with_options(
            store,
            MigrationDirectory::new(self.migrations_dir(dir)),
            options,
        ))
    }
}
