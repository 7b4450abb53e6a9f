//! Error types for rk-sql

use thiserror::Error;

/// SQL parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlError {
    /// SQL parse error (S001)
    #[error("[S001] SQL syntax error: {message}")]
    ParseError {
        message: String,
        location: Option<(usize, usize)>,
    },

    /// Empty SQL (S002)
    #[error("[S002] SQL is empty")]
    EmptySql,

    /// Unsupported SQL statement (S003)
    #[error("[S003] Unsupported SQL statement type: {0}")]
    UnsupportedStatement(String),

    /// More than one statement in a model (S004)
    #[error("[S004] A model must contain exactly one SELECT statement, found {0}")]
    MultipleStatements(usize),
}

impl SqlError {
    /// 1-based `(line, column)` of a parse error, when the parser reported one
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            SqlError::ParseError { location, .. } => *location,
            _ => None,
        }
    }
}

/// Result type alias for SqlError
pub type SqlResult<T> = Result<T, SqlError>;
