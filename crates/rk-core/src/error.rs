//! Error types for rk-core

use thiserror::Error;

/// Core error type for Rekon
///
/// These are infrastructure failures. Problems with an individual artifact
/// are reported as [`ReconcileError`](crate::ReconcileError) values instead.
#[derive(Error, Debug)]
pub enum CoreError {
    /// K001: Configuration file not found
    #[error("[K001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// K002: Failed to parse configuration file
    #[error("[K002] Failed to parse config: {message}")]
    ConfigParseError { message: String },

    /// K003: Invalid configuration value
    #[error("[K003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// K004: Artifact does not exist
    #[error("[K004] Artifact not found: {path}")]
    ArtifactNotFound { path: String },

    /// K005: Artifact already exists and the write asked for create-only
    #[error("[K005] Artifact already exists: {path}")]
    ArtifactExists { path: String },

    /// K006: Artifact path is not usable
    #[error("[K006] Invalid artifact path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// K007: Catalog entry not found
    #[error("[K007] Catalog entry not found: {name}")]
    EntryNotFound { name: String },

    /// K008: Two staged entries claim the same name
    #[error("[K008] Duplicate entry name '{name}' ({path1} and {path2})")]
    DuplicateEntry {
        name: String,
        path1: String,
        path2: String,
    },

    /// K013: Commit would introduce a dependency cycle
    #[error("[K013] Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    /// K009: Invalid glob pattern
    #[error("[K009] Invalid glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    /// K010: IO error
    #[error("[K010] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// K011: IO error with file path context
    #[error("[K011] Failed to access '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// K012: YAML parse error
    #[error("[K012] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
