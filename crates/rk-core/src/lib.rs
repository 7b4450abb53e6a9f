//! rk-core - Core library for Rekon
//!
//! This crate provides the catalog, the dependency graph, artifact stores,
//! project configuration and the reconcile error taxonomy shared by the
//! runtime and the CLI. It does no I/O against the OLAP store.

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod dag;
pub mod entry;
pub mod entry_name;
pub mod error;
pub mod reconcile_error;

pub use artifact::{
    detect_kind, entry_name_for_path, normalize_path, Artifact, ArtifactStore, FileStore,
    MemStore,
};
pub use catalog::{Catalog, CatalogSnapshot, CatalogTxn};
pub use config::{OlapConfig, OlapDriver, ProjectConfig};
pub use dag::{compute_affected, DependencyGraph};
pub use entry::{
    CatalogEntry, Column, Connector, Dimension, EntryKind, EntrySpec, Measure, MetricsViewSpec,
    ModelDialect, ModelSpec, SourceFormat, SourceSpec, TableSpec, TimeGrain,
};
pub use entry_name::EntryName;
pub use error::{CoreError, CoreResult};
pub use reconcile_error::{
    CharLocation, ErrorAggregator, ErrorCode, ReconcileError, ReconcileResult,
};
