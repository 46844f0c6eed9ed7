//! Logging setup for the CLI.
//!
//! # Environment Variables
//!
//! - `SCHEMASYNC_LOG=debug|info|warn|error|trace` - log level, or a full
//!   `EnvFilter` directive such as `schemasync_migrate=debug`
//! - `SCHEMASYNC_LOG_FORMAT=json|pretty|compact` - output format (default: compact)
//!
//! `-v` raises the default level from `warn` to `debug`. Logs go to stderr so
//! `sync --stdout` output stays clean.

use std::env;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

const CRATES: [&str; 3] = ["schemasync_cli", "schemasync_migrate", "schemasync_postgres"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line human output.
    Pretty,
    /// Single-line human output.
    Compact,
}

/// Parse `SCHEMASYNC_LOG_FORMAT`.
pub fn log_format(value: Option<&str>) -> LogFormat {
    match value.map(str::to_lowercase).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

/// Build the filter directive from `SCHEMASYNC_LOG` and `-v`.
pub fn filter_directive(value: Option<&str>, verbose: bool) -> String {
    let level = match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(directive) if directive.contains('=') => return directive.to_string(),
        Some(level) => level.to_lowercase(),
        None if verbose => "debug".to_string(),
        None => "warn".to_string(),
    };
    CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging. Subsequent calls are no-ops.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let directive = filter_directive(env::var("SCHEMASYNC_LOG").ok().as_deref(), verbose);
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));
        let format = log_format(env::var("SCHEMASYNC_LOG_FORMAT").ok().as_deref());

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Compact => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact().with_writer(std::io::stderr))
                    .init();
            }
        }

        tracing::debug!(filter = %directive, format = ?format, "Logging initialized");
    });
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_level_is_warn() {
        assert_eq!(
            filter_directive(None, false),
            "schemasync_cli=warn,schemasync_migrate=warn,schemasync_postgres=warn"
        );
    }

    #[test]
    fn test_verbose_and_explicit_levels() {
        assert!(filter_directive(None, true).starts_with("schemasync_cli=debug"));
        assert!(filter_directive(Some("INFO"), true).contains("schemasync_migrate=info"));
        assert_eq!(
            filter_directive(Some("schemasync_migrate=trace"), false),
            "schemasync_migrate=trace"
        );
    }

    #[test]
    fn test_log_format() {
        assert_eq!(log_format(Some("JSON")), LogFormat::Json);
        assert_eq!(log_format(Some("pretty")), LogFormat::Pretty);
        assert_eq!(log_format(Some("other")), LogFormat::Compact);
        assert_eq!(log_format(None), LogFormat::Compact);
    }
}
