//! rk-db - OLAP abstraction layer for Rekon
//!
//! This crate provides the `Database` trait the reconciler migrates
//! entries through, and its DuckDB implementation.

pub mod duckdb;
pub mod error;
pub mod traits;

pub use crate::duckdb::DuckDbBackend;
pub use error::{DbError, DbResult};
pub use traits::{quote_literal, quote_relation, Database, RelationInfo, RelationKind};
