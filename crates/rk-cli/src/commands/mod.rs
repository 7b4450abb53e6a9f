//! CLI command implementations

pub(crate) mod catalog;
pub(crate) mod common;
pub(crate) mod files;
pub(crate) mod reconcile;
