//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::environment::Environment;

/// schemasync - PostgreSQL migration runner and schema sync
#[derive(Parser, Debug)]
#[command(name = "schemasync")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Apply SQL migrations and sync schemas between environments", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Environment the command runs against
    #[arg(
        short,
        long,
        global = true,
        env = "SCHEMASYNC_ENV",
        value_enum,
        default_value_t = Environment::Development
    )]
    pub env: Environment,

    /// Path to the configuration file (defaults to ./schemasync.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show applied, pending, modified and orphaned migrations
    Status(StatusArgs),

    /// Apply pending migrations, or a single version
    Run(RunArgs),

    /// Record a migration as applied without executing it
    Mark(MarkArgs),

    /// Generate SQL that aligns the target schema with the reference schema
    Sync(SyncArgs),
}

/// Arguments for the `status` command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Migrations directory (overrides the config file)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

/// Arguments for the `run` command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Version to apply (e.g. 069); all pending when omitted
    #[arg(id = "target_version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Migrations directory (overrides the config file)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Refuse to run while an applied migration has been modified
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for the `mark` command
#[derive(Args, Debug)]
pub struct MarkArgs {
    /// Version to record as applied
    #[arg(id = "target_version", value_name = "VERSION")]
    pub version: String,

    /// Migrations directory (overrides the config file)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,
}

/// Arguments for the `sync` command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Environment whose schema is the source of truth
    #[arg(long, value_enum, default_value_t = Environment::Development)]
    pub reference: Environment,

    /// Environment the generated SQL is meant for
    #[arg(long, value_enum, default_value_t = Environment::Production)]
    pub target: Environment,

    /// Directory for the generated SQL files (overrides the config file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the SQL instead of writing files
    #[arg(long)]
    pub stdout: bool,

    /// Schema namespace to compare (overrides the config file)
    #[arg(long)]
    pub schema: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_defaults_to_development_into_production() {
        let cli = Cli::try_parse_from(["schemasync", "sync"]).unwrap();
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.reference, Environment::Development);
                assert_eq!(args.target, Environment::Production);
                assert!(!args.stdout);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_env_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["schemasync", "run", "069", "--env", "production"]).unwrap();
        assert_eq!(cli.env, Environment::Production);
        match cli.command {
            Command::Run(args) => assert_eq!(args.version.as_deref(), Some("069")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_mark_requires_version() {
        assert!(Cli::try_parse_from(["schemasync", "mark"]).is_err());
    }
}
