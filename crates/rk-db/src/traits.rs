//! Database trait definition

use crate::error::DbResult;
use async_trait::async_trait;
use rk_core::Column;

/// Kind of relation an OLAP object is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    View,
}

impl RelationKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            RelationKind::Table => "TABLE",
            RelationKind::View => "VIEW",
        }
    }
}

/// A relation in the default schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    pub name: String,
    pub kind: RelationKind,
}

/// OLAP abstraction used by the reconciler
///
/// Implementations must be Send + Sync for async operation. Relation names
/// are unquoted; implementations quote them.
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute SQL that modifies data, returns affected rows
    async fn execute(&self, sql: &str) -> DbResult<usize>;

    /// Execute multiple SQL statements
    async fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Create table from SELECT statement
    async fn create_table_as(&self, name: &str, select: &str, replace: bool) -> DbResult<()>;

    /// Create view from SELECT statement
    async fn create_view_as(&self, name: &str, select: &str, replace: bool) -> DbResult<()>;

    /// Whether `name` is a table, a view, or absent
    async fn relation_kind(&self, name: &str) -> DbResult<Option<RelationKind>>;

    /// Check if a table or view exists
    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        Ok(self.relation_kind(name).await?.is_some())
    }

    /// Columns of a relation in ordinal order
    async fn describe(&self, name: &str) -> DbResult<Vec<Column>>;

    /// Every table and view in the default schema, sorted by name
    async fn list_relations(&self) -> DbResult<Vec<RelationInfo>>;

    /// Rename a table or view
    async fn rename_relation(&self, from: &str, to: &str) -> DbResult<()>;

    /// Drop a table or view if it exists
    async fn drop_if_exists(&self, name: &str) -> DbResult<()>;

    /// Execute query returning row count
    async fn query_count(&self, sql: &str) -> DbResult<usize>;

    /// First column of every row of `sql`, as strings
    async fn query_strings(&self, sql: &str) -> DbResult<Vec<String>>;

    /// Cancel the statement currently running, if any. The cancelled call
    /// returns an error and its changes are rolled back.
    fn interrupt(&self) {}

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}

/// Quote a possibly dotted relation name part by part
pub fn quote_relation(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
