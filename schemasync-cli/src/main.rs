//! schemasync - PostgreSQL migration runner and schema sync.
//!
//! Exits 1 when a migration or introspection fails and 2 for configuration
//! and usage errors.

use clap::Parser;

use schemasync_cli::cli::{Cli, Command};
use schemasync_cli::commands::{self, Context};
use schemasync_cli::error::CliResult;
use schemasync_cli::{logging, output};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        if let Some(help) = miette::Diagnostic::help(&e) {
            output::dim(&help.to_string());
        }
        std::process::exit(e.exit_code());
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let ctx = Context::load(&cli)?;

    match cli.command {
        Command::Status(args) => commands::status::run(&ctx, args).await,
        Command::Run(args) => commands::run::run(&ctx, args).await,
        Command::Mark(args) => commands::mark::run(&ctx, args).await,
        Command::Sync(args) => commands::sync::run(&ctx, args).await,
    }
}
