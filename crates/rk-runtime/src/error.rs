//! Error types for rk-runtime

use rk_core::CoreError;
use rk_db::DbError;
use thiserror::Error;

/// Infrastructure failures of the runtime.
///
/// Problems with individual artifacts never surface here; they are
/// reported as `ReconcileError` values in the run result.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// R001: No instance with this id
    #[error("[R001] Instance not found: {id}")]
    InstanceNotFound { id: String },

    /// R002: Instance id already taken
    #[error("[R002] Instance already exists: {id}")]
    InstanceExists { id: String },

    /// R003: Instance configuration rejected
    #[error("[R003] Invalid instance config: {message}")]
    InvalidInstance { message: String },

    /// R004: Catalog could not be loaded or saved
    #[error("[R004] Catalog persistence failed: {message}")]
    CatalogStore { message: String },

    /// R005: Core error (artifact store, catalog, config)
    #[error("[R005] {0}")]
    Core(#[from] CoreError),

    /// R006: OLAP error outside a per-entry migration
    #[error("[R006] {0}")]
    Db(#[from] DbError),

    /// R007: IO error with file path context
    #[error("[R007] Failed to access '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// R008: Instance was replaced by an edit or deleted
    #[error("[R008] Instance {id} was replaced or deleted; fetch it again")]
    InstanceRetired { id: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for RuntimeError
pub type RuntimeResult<T> = Result<T, RuntimeError>;
