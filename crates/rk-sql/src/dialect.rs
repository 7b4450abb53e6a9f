//! SQL dialects models can be written in

use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, DuckDbDialect as SqlParserDuckDb};
use sqlparser::parser::Parser;

use crate::error::{SqlError, SqlResult};

/// A dialect Rekon can parse model SQL in
pub trait SqlDialect: Send + Sync {
    fn parser_dialect(&self) -> &dyn Dialect;

    fn name(&self) -> &'static str;

    /// Parse SQL into statements, splitting the parser's location out of
    /// its message.
    fn parse(&self, sql: &str) -> SqlResult<Vec<Statement>> {
        Parser::parse_sql(self.parser_dialect(), sql).map_err(|e| {
            let (message, location) = split_location(&e.to_string());
            SqlError::ParseError { message, location }
        })
    }

    fn quote_ident(&self, ident: &str) -> String {
        quote_ident(ident)
    }
}

/// Split a sqlparser message ending in `at Line: N, Column: M` into the
/// bare message and its 1-based location.
pub(crate) fn split_location(msg: &str) -> (String, Option<(usize, usize)>) {
    let Some((head, tail)) = msg.rsplit_once(" at Line: ") else {
        return (msg.to_string(), None);
    };
    let Some((line, column)) = tail.split_once(", Column: ") else {
        return (msg.to_string(), None);
    };
    let digits = |s: &str| -> Option<usize> {
        let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        s[..end].parse().ok()
    };
    match (digits(line.trim()), digits(column.trim())) {
        (Some(line), Some(column)) if line > 0 => (head.trim_end().to_string(), Some((line, column))),
        _ => (msg.to_string(), None),
    }
}

/// DuckDB, the dialect of the OLAP store
#[derive(Debug, Default)]
pub struct DuckDbDialect(SqlParserDuckDb);

impl DuckDbDialect {
    pub fn new() -> Self {
        Self(SqlParserDuckDb {})
    }
}

impl SqlDialect for DuckDbDialect {
    fn parser_dialect(&self) -> &dyn Dialect {
        &self.0
    }

    fn name(&self) -> &'static str {
        "duckdb"
    }
}

/// Double-quote an identifier, escaping embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
#[path = "dialect_test.rs"]
mod tests;
