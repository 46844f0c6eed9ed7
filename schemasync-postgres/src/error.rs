//! Error types for PostgreSQL operations.

use std::fmt;

use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Extract the server-reported error fields, if this came from the database.
    pub fn db_context(&self) -> Option<DbErrorContext> {
        match self {
            Self::Postgres(e) => e.as_db_error().map(DbErrorContext::from_db_error),
            _ => None,
        }
    }
}

/// SQLSTATE `query_canceled`, raised when `statement_timeout` expires.
pub const QUERY_CANCELED: &str = "57014";

/// Fields PostgreSQL attaches to an error report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbErrorContext {
    /// SQLSTATE code.
    pub code: Option<String>,
    /// Primary message.
    pub message: String,
    /// Optional detail line.
    pub detail: Option<String>,
    /// Optional hint line.
    pub hint: Option<String>,
    /// 1-based character offset into the submitted SQL.
    pub position: Option<u32>,
    /// Context / call stack reported by PL/pgSQL.
    pub where_: Option<String>,
}

impl DbErrorContext {
    fn from_db_error(e: &tokio_postgres::error::DbError) -> Self {
        use tokio_postgres::error::ErrorPosition;

        let position = match e.position() {
            Some(ErrorPosition::Original(pos)) => Some(*pos),
            Some(ErrorPosition::Internal { position, .. }) => Some(*position),
            None => None,
        };

        Self {
            code: Some(e.code().code().to_string()),
            message: e.message().to_string(),
            detail: e.detail().map(String::from),
            hint: e.hint().map(String::from),
            position,
            where_: e.where_().map(String::from),
        }
    }

    /// Whether the server cancelled the statement, which on a schemasync
    /// connection means the statement timeout expired.
    pub fn is_statement_timeout(&self) -> bool {
        self.code.as_deref() == Some(QUERY_CANCELED)
    }

    /// Translate a character position into a 1-based `(line, column)` within `sql`.
    pub fn line_and_column(&self, sql: &str) -> Option<(usize, usize)> {
        let position = self.position? as usize;
        let mut line = 1;
        let mut column = 1;
        for (i, ch) in sql.chars().enumerate() {
            if i + 1 == position {
                return Some((line, column));
            }
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        None
    }
}

impl fmt::Display for DbErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "; detail: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "; hint: {}", hint)?;
        }
        if let Some(position) = self.position {
            write!(f, "; at character {}", position)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PgError::config("invalid URL");
        assert!(matches!(err, PgError::Config(_)));
        assert!(err.db_context().is_none());
    }

    #[test]
    fn test_statement_timeout_code() {
        let ctx = DbErrorContext {
            code: Some(QUERY_CANCELED.to_string()),
            message: "canceling statement due to statement timeout".to_string(),
            ..Default::default()
        };
        assert!(ctx.is_statement_timeout());

        let ctx = DbErrorContext {
            code: Some("42P01".to_string()),
            ..Default::default()
        };
        assert!(!ctx.is_statement_timeout());
        assert!(!DbErrorContext::default().is_statement_timeout());
    }

    #[test]
    fn test_context_display() {
        let ctx = DbErrorContext {
            code: Some("42P01".to_string()),
            message: "relation \"missing\" does not exist".to_string(),
            detail: None,
            hint: Some("check the table name".to_string()),
            position: Some(15),
            where_: None,
        };
        let msg = ctx.to_string();
        assert!(msg.contains("42P01"));
        assert!(msg.contains("hint: check the table name"));
        assert!(msg.contains("at character 15"));
    }

    #[test]
    fn test_line_and_column() {
        let sql = "SELECT 1;\nSELECT * FROM missing;";
        let ctx = DbErrorContext {
            position: Some(25),
            ..Default::default()
        };
        assert_eq!(ctx.line_and_column(sql), Some((2, 15)));

        let ctx = DbErrorContext {
            position: Some(500),
            ..Default::default()
        };
        assert_eq!(ctx.line_and_column(sql), None);
    }
}
