//! Per-path reconcile errors and the run-wide aggregator.
//!
//! Every failing path yields at least one [`ReconcileError`]. The
//! [`ErrorAggregator`] keeps them in discovery order, drops exact repeats,
//! and records which paths a run visited.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Error taxonomy; serialized with the wire-stable `CODE_*` strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    #[serde(rename = "CODE_UNSPECIFIED")]
    Unspecified,
    /// Artifact failed to parse
    #[serde(rename = "CODE_SYNTAX")]
    Syntax,
    /// Artifact has internal validation errors
    #[serde(rename = "CODE_VALIDATION")]
    Validation,
    /// Artifact is valid but has invalid dependencies
    #[serde(rename = "CODE_DEPENDENCY")]
    Dependency,
    /// Error returned from the OLAP database
    #[serde(rename = "CODE_OLAP")]
    Olap,
    /// Error during source inspection or ingestion
    #[serde(rename = "CODE_SOURCE")]
    Source,
    /// Not authorised to access a remote source
    #[serde(rename = "CODE_SOURCE_PERMISSION_DENIED")]
    SourcePermissionDenied,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unspecified => "CODE_UNSPECIFIED",
            ErrorCode::Syntax => "CODE_SYNTAX",
            ErrorCode::Validation => "CODE_VALIDATION",
            ErrorCode::Dependency => "CODE_DEPENDENCY",
            ErrorCode::Olap => "CODE_OLAP",
            ErrorCode::Source => "CODE_SOURCE",
            ErrorCode::SourcePermissionDenied => "CODE_SOURCE_PERMISSION_DENIED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based line/column position inside an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharLocation {
    pub line: u32,
    pub column: u32,
}

/// An error attached to the artifact path that caused it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileError {
    pub code: ErrorCode,
    pub message: String,
    pub file_path: String,

    /// Field locator into a YAML artifact, e.g. `["dimensions", "1", "column"]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_path: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<CharLocation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_location: Option<CharLocation>,
}

impl ReconcileError {
    pub fn new(code: ErrorCode, file_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            file_path: file_path.into(),
            property_path: Vec::new(),
            start_location: None,
            end_location: None,
        }
    }

    /// Attach a JS-style property path (`key0.key1[2].key3`).
    pub fn with_property_path(mut self, path: &str) -> Self {
        self.property_path = split_property_path(path);
        self
    }

    /// Attach a start location. Zero values mean "unknown" and are ignored.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        if line > 0 {
            self.start_location = Some(CharLocation {
                line,
                column: column.max(1),
            });
        }
        self
    }

    pub fn until(mut self, line: u32, column: u32) -> Self {
        if line > 0 {
            self.end_location = Some(CharLocation {
                line,
                column: column.max(1),
            });
        }
        self
    }

    fn dedup_key(&self) -> (String, ErrorCode, Vec<String>) {
        (self.file_path.clone(), self.code, self.property_path.clone())
    }
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.file_path)?;
        if let Some(loc) = self.start_location {
            write!(f, ":{}:{}", loc.line, loc.column)?;
        }
        if !self.property_path.is_empty() {
            write!(f, " ({})", self.property_path.join("."))?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Split `dimensions[1].column` into `["dimensions", "1", "column"]`.
pub fn split_property_path(path: &str) -> Vec<String> {
    path.split(['.', '[', ']'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Errors in discovery order. In non-strict runs any affected path
    /// without an error was reconciled successfully.
    pub errors: Vec<ReconcileError>,

    /// Every artifact path the run considered, sorted
    pub affected_paths: Vec<String>,
}

impl ReconcileResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a ReconcileError> + 'a {
        self.errors.iter().filter(move |e| e.file_path == path)
    }
}

/// Collects errors and visited paths across a whole run
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    errors: Vec<ReconcileError>,
    seen: HashSet<(String, ErrorCode, Vec<String>)>,
    affected: BTreeSet<String>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` was considered by the run.
    pub fn visit(&mut self, path: &str) {
        self.affected.insert(path.to_string());
    }

    /// Add an error, returning false when an identical
    /// `(path, code, property_path)` tuple was already reported.
    ///
    /// The error's path counts as visited.
    pub fn push(&mut self, err: ReconcileError) -> bool {
        self.visit(&err.file_path);
        if !self.seen.insert(err.dedup_key()) {
            return false;
        }
        self.errors.push(err);
        true
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = ReconcileError>) {
        for err in errs {
            self.push(err);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_error_for(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.file_path == path)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_visited(&self, path: &str) -> bool {
        self.affected.contains(path)
    }

    pub fn finish(self) -> ReconcileResult {
        ReconcileResult {
            errors: self.errors,
            affected_paths: self.affected.into_iter().collect(),
        }
    }
}

#[cfg(test)]
#[path = "reconcile_error_test.rs"]
mod tests;
