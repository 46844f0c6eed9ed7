//! `schemasync run` - apply pending migrations.

use std::io;

use schemasync_migrate::{ExecutionFailure, MigrationPhase, RunReport};

use crate::cli::RunArgs;
use crate::commands::Context;
use crate::environment::confirm_production;
use crate::error::{CliError, CliResult};
use crate::output::{self, style_error, style_pending, style_success};

/// Run the run command
pub async fn run(ctx: &Context, args: RunArgs) -> CliResult<()> {
    output::header("Run Migrations");

    let resolved = ctx.resolve(ctx.environment)?;
    let runner = ctx
        .runner(&resolved, args.dir.as_deref(), args.strict)
        .await?;

    output::kv("Environment", &resolved.label());
    output::kv("Directory", &ctx.migrations_dir(args.dir.as_deref()).display().to_string());
    output::newline();

    let status = runner.status().await?;
    let planned: Vec<String> = match &args.version {
        Some(version) => vec![version.clone()],
        None => status.pending().map(|f| f.filename.clone()).collect(),
    };
    if planned.is_empty() {
        output::success("No pending migrations");
        return Ok(());
    }

    output::section("To apply");
    for name in &planned {
        output::list_item(name);
    }
    output::newline();

    confirm_production(
        &resolved,
        &format!("apply {} migration(s)", planned.len()),
        &mut io::stdin().lock(),
        &mut io::stdout(),
    )?;

    let report = runner.run(args.version.as_deref()).await?;
    print_report(&report);

    match report.failure {
        Some(failure) => Err(CliError::MigrationFailed {
            version: failure.version,
        }),
        None => Ok(()),
    }
}

fn print_report(report: &RunReport) {
    for warning in &report.warnings {
        output::warn(warning);
    }

    for outcome in &report.outcomes {
        let (marker, detail) = match outcome.phase {
            MigrationPhase::Applied => (
                style_success("✔"),
                format!("applied in {}ms", outcome.execution_ms.unwrap_or_default()),
            ),
            MigrationPhase::Failed => (style_error("✖"), "failed, rolled back".to_string()),
            MigrationPhase::Pending | MigrationPhase::Applying => {
                (style_pending("○"), "not attempted".to_string())
            }
        };
        output::migration_row(&marker, &outcome.version, &outcome.filename, &detail);
    }

    if let Some(failure) = &report.failure {
        print_failure(failure);
    }

    output::newline();
    if report.is_success() {
        output::success(&report.summary());
    } else {
        output::info(&report.summary());
    }
}

fn print_failure(failure: &ExecutionFailure) {
    output::newline();
    output::error(&format!("{}: {}", failure.filename, failure.message));
    if let Some(code) = &failure.code {
        output::kv("SQLSTATE", code);
    }
    if let Some(detail) = &failure.detail {
        output::kv("Detail", detail);
    }
    if let Some(hint) = &failure.hint {
        output::kv("Hint", hint);
    }
    match (failure.location, failure.position) {
        (Some((line, column)), _) => {
            output::kv("Position", &format!("line {}, column {}", line, column))
        }
        (None, Some(position)) => output::kv("Position", &format!("character {}", position)),
        (None, None) => {}
    }
    if failure.timed_out {
        output::warn(
            "The statement timeout cancelled this file; raise connection.statement_timeout_ms in schemasync.toml if it is expected to run longer",
        );
    }
}
