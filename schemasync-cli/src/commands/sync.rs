//! `schemasync sync` - generate SQL aligning one environment with another.
//!
//! Both databases are only read. The generated files are for the operator to
//! review and apply.

use schemasync_migrate::{CatalogIntrospector, PostgresIntrospector, SchemaDiffer, SqlGenerator};
use tracing::info;

use crate::cli::SyncArgs;
use crate::commands::Context;
use crate::environment::ResolvedEnvironment;
use crate::error::{CliError, CliResult};
use crate::output;

/// Run the sync command
pub async fn run(ctx: &Context, args: SyncArgs) -> CliResult<()> {
    if args.reference == args.target {
        return Err(CliError::Usage(format!(
            "Reference and target are both {}",
            args.reference
        )));
    }

    let reference = ctx.resolve(args.reference)?;
    let target = ctx.resolve(args.target)?;
    ensure_distinct(&reference, &target)?;

    let schema = args
        .schema
        .clone()
        .unwrap_or_else(|| ctx.config.sync.schema.clone());

    if !args.stdout {
        output::header("Schema Sync");
        output::kv("Reference", &reference.label());
        output::kv("Target", &target.label());
        output::kv("Schema", &schema);
        output::newline();
    }

    let (reference_pool, target_pool) =
        tokio::try_join!(ctx.connect(&reference), ctx.connect(&target))?;
    let reference_introspector =
        PostgresIntrospector::new(reference_pool, reference.environment.name()).with_schema(&schema);
    let target_introspector =
        PostgresIntrospector::new(target_pool, target.environment.name()).with_schema(&schema);

    let (reference_snapshot, target_snapshot) = tokio::try_join!(
        reference_introspector.introspect(),
        target_introspector.introspect()
    )?;

    let diff = SchemaDiffer::new(ctx.config.skip_list()).diff(&reference_snapshot, &target_snapshot);
    let scripts = SqlGenerator::for_schema(&schema).render(&diff);
    info!(summary = %diff.summary(), "Schema diff computed");

    for warning in &diff.warnings {
        output::warn(&warning.to_string());
    }

    if args.stdout {
        print!("{}", scripts.combined());
        return Ok(());
    }

    let dir = ctx
        .cwd
        .join(args.output.as_deref().unwrap_or(ctx.config.sync.output.as_path()));
    let written = scripts.write_to(&dir).await?;

    output::section("Generated");
    for (path, doc) in written.iter().zip(scripts.documents()) {
        let detail = if doc.is_noop() {
            "no changes".to_string()
        } else {
            format!(
                "dropped={} created={} altered={}",
                doc.dropped, doc.created, doc.altered
            )
        };
        output::list_item(&format!("{} ({})", path.display(), detail));
    }

    output::newline();
    if diff.is_empty() {
        output::success(&format!("{} already matches {}", target.environment, reference.environment));
    } else {
        output::info(&diff.summary());
        output::info(&format!(
            "Review the files in order, then apply them to {}",
            target.label()
        ));
    }
    Ok(())
}

fn ensure_distinct(reference: &ResolvedEnvironment, target: &ResolvedEnvironment) -> CliResult<()> {
    if reference.url == target.url {
        return Err(CliError::Usage(format!(
            "{} and {} resolve to the same database ({}); refusing to diff a database with itself",
            reference.environment, target.environment, reference.identifier
        )));
    }
    Ok(())
}
