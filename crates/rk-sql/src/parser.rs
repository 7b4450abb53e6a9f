//! Model SQL parsing

use crate::dialect::{DuckDbDialect, SqlDialect};
use crate::error::{SqlError, SqlResult};
use sqlparser::ast::Statement;

/// Parses model SQL in one dialect
pub struct SqlParser {
    dialect: Box<dyn SqlDialect>,
}

impl SqlParser {
    pub fn new(dialect: Box<dyn SqlDialect>) -> Self {
        Self { dialect }
    }

    pub fn duckdb() -> Self {
        Self::new(Box::new(DuckDbDialect::new()))
    }

    pub fn dialect_name(&self) -> &'static str {
        self.dialect.name()
    }

    /// Parse SQL into statements; blank input is an error.
    pub fn parse(&self, sql: &str) -> SqlResult<Vec<Statement>> {
        match sql.trim() {
            "" => Err(SqlError::EmptySql),
            sql => self.dialect.parse(sql),
        }
    }

    /// Parse the SQL of a model, which must be a single query.
    ///
    /// A trailing semicolon is accepted.
    pub fn parse_model(&self, sql: &str) -> SqlResult<Statement> {
        let mut stmts = self.parse(sql)?;
        if stmts.len() > 1 {
            return Err(SqlError::MultipleStatements(stmts.len()));
        }
        match stmts.pop() {
            Some(stmt @ Statement::Query(_)) => Ok(stmt),
            Some(other) => Err(SqlError::UnsupportedStatement(statement_label(&other))),
            None => Err(SqlError::EmptySql),
        }
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::duckdb()
    }
}

/// Leading keywords of a statement, e.g. `DROP TABLE`
fn statement_label(stmt: &Statement) -> String {
    stmt.to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[cfg(test)]
#[path = "parser_test.rs"]
mod tests;
