//! Error types for rk-db

use thiserror::Error;

/// OLAP operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// Table not found (D003)
    #[error("[D003] Table or view not found: {0}")]
    TableNotFound(String),

    /// Remote data refused access (D004)
    #[error("[D004] Access denied: {0}")]
    PermissionDenied(String),

    /// Mutex poisoned (D006)
    #[error("[D006] Database mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// Internal error (D007)
    #[error("[D007] Internal database error: {0}")]
    Internal(String),
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

/// Message fragments that mean a remote location refused our credentials
const PERMISSION_MARKERS: &[&str] = &[
    "401",
    "403",
    "access denied",
    "accessdenied",
    "permission denied",
    "forbidden",
    "unauthorized",
];

impl DbError {
    /// Classify an engine error message.
    pub fn classify(msg: String) -> Self {
        let lower = msg.to_ascii_lowercase();
        if PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
            DbError::PermissionDenied(msg)
        } else if msg.contains("Table with name")
            || msg.contains("View with name")
            || msg.contains("Table or view with name")
            || (msg.contains("Catalog Error") && msg.contains("Table") && msg.contains("not found"))
        {
            DbError::TableNotFound(msg)
        } else {
            DbError::ExecutionError(msg)
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DbError::PermissionDenied(_))
    }
}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        // duckdb::Error has no structured variants for catalog errors, so
        // the message is all there is to go on.
        DbError::classify(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permission_denied() {
        for msg in [
            "HTTP Error: HTTP GET error on 'https://x/y.csv' (HTTP 403)",
            "IO Error: Access Denied",
            "Permission denied: /root/secret.parquet",
        ] {
            assert!(DbError::classify(msg.to_string()).is_permission_denied(), "{msg}");
        }
    }

    #[test]
    fn test_classify_missing_table() {
        let err = DbError::classify(
            "Catalog Error: Table with name nope does not exist!".to_string(),
        );
        assert!(matches!(err, DbError::TableNotFound(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = DbError::classify("Binder Error: column x not found".to_string());
        assert!(matches!(err, DbError::ExecutionError(_)));
    }
}
