//! `schemasync status` - compare migration files with the tracking table.

use schemasync_migrate::{FileStatus, StatusReport};

use crate::cli::StatusArgs;
use crate::commands::Context;
use crate::error::CliResult;
use crate::output::{self, style_error, style_pending, style_success};

/// Run the status command. Never writes to the database.
pub async fn run(ctx: &Context, args: StatusArgs) -> CliResult<()> {
    output::header("Migration Status");

    let resolved = ctx.resolve(ctx.environment)?;
    let runner = ctx.runner(&resolved, args.dir.as_deref(), false).await?;

    output::kv("Environment", &resolved.label());
    output::kv("Directory", &ctx.migrations_dir(args.dir.as_deref()).display().to_string());
    output::newline();

    let report = runner.status().await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &StatusReport) {
    if report.files.is_empty() {
        output::info("No migration files found");
    }

    for entry in &report.files {
        match &entry.status {
            FileStatus::Applied { record, drift } => {
                let mut detail = format!(
                    "applied {} by {}",
                    record.applied_at.format("%Y-%m-%d %H:%M"),
                    record.applied_by
                );
                if *drift {
                    detail.push_str(" - modified after applying");
                }
                let marker = if *drift { style_pending("⚠") } else { style_success("✔") };
                output::migration_row(&marker, &entry.file.version, &entry.file.filename, &detail);
            }
            FileStatus::Pending => {
                output::migration_row(
                    &style_pending("○"),
                    &entry.file.version,
                    &entry.file.filename,
                    "pending",
                );
            }
        }
    }

    for record in &report.orphaned {
        output::migration_row(
            &style_error("✖"),
            &record.version,
            &record.filename,
            "orphaned: applied but no file on disk",
        );
    }

    output::newline();
    output::section("Totals");
    output::kv("Applied", &report.applied_count().to_string());
    output::kv("Pending", &report.pending_count().to_string());
    if report.drifted_count() > 0 {
        output::kv("Modified", &report.drifted_count().to_string());
    }
    if !report.orphaned.is_empty() {
        output::kv("Orphaned", &report.orphaned.len().to_string());
    }
    output::kv("Progress", &format!("{:.1}% applied", report.percent_applied()));

    for entry in report.drifted() {
        output::warn(&format!(
            "{} was modified after it was applied",
            entry.file.filename
        ));
    }

    output::newline();
    if report.is_up_to_date() {
        output::success("Database is up to date");
    } else {
        output::info(&format!(
            "{} pending migration(s); apply with `schemasync run`",
            report.pending_count()
        ));
    }
}
