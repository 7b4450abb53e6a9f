//! rk-runtime - Reconciliation runtime for Rekon
//!
//! Compiles artifacts into typed catalog entries, validates them against
//! the catalog, migrates them into the OLAP store in dependency order, and
//! persists the resulting catalog. [`Instance`] is the entry point; the
//! [`Reconciler`] can also be driven directly over a borrowed catalog.

pub mod error;
pub mod instance;
pub mod kinds;
pub mod persist;
pub mod reconciler;
pub mod template;

pub use error::{RuntimeError, RuntimeResult};
pub use instance::{Instance, InstanceConfig, InstanceRegistry, RepoDriver};
pub use kinds::{handler_for, KindHandler, Scope};
pub use persist::{CatalogStore, JsonCatalogStore, OlapCatalogStore, CATALOG_TABLE};
pub use reconciler::{EntryState, ReconcileOptions, Reconciler};
pub use template::{Rendered, TemplateEngine, TemplateError};
