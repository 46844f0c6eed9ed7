//! `schemasync mark` - record a migration without executing it.

use std::io;

use crate::cli::MarkArgs;
use crate::commands::Context;
use crate::environment::confirm_production;
use crate::error::CliResult;
use crate::output;

/// Run the mark command
pub async fn run(ctx: &Context, args: MarkArgs) -> CliResult<()> {
    output::header("Mark Migration");

    let resolved = ctx.resolve(ctx.environment)?;
    output::kv("Environment", &resolved.label());
    output::kv("Version", &args.version);
    output::newline();

    confirm_production(
        &resolved,
        &format!("mark migration {} as applied", args.version),
        &mut io::stdin().lock(),
        &mut io::stdout(),
    )?;

    let runner = ctx.runner(&resolved, args.dir.as_deref(), false).await?;
    let record = runner.mark(&args.version).await?;

    output::success(&format!(
        "Recorded {} as applied without executing it",
        record.filename
    ));
    Ok(())
}
