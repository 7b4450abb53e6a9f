//! rk-sql - SQL parsing layer for Rekon
//!
//! This crate parses model SQL with sqlparser-rs and extracts the relations
//! a model reads, which become its dependency edges.

pub mod dialect;
pub mod error;
pub mod extractor;
pub mod parser;

pub use dialect::{quote_ident, DuckDbDialect, SqlDialect};
pub use error::{SqlError, SqlResult};
pub use extractor::{extract_references, normalize_table_name};
pub use parser::SqlParser;
