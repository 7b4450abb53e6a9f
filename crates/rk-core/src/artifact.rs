//! Artifact stores: path-addressed text blobs with modification times
//!
//! Paths are always normalized to the `/dir/file.ext` form so that the
//! same artifact has the same key regardless of the store backing it.

use crate::entry::EntryKind;
use crate::entry_name::EntryName;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

/// Project config files that live next to artifacts but are not artifacts
pub const CONFIG_FILE_NAMES: &[&str] = &["/rekon.yml", "/rekon.yaml"];

/// Glob patterns that together match every artifact a store may hold
pub const ARTIFACT_GLOBS: &[&str] = &["/**/*.sql", "/**/*.yaml", "/**/*.yml"];

/// A versioned code artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: String,
    pub blob: String,
    pub updated_on: DateTime<Utc>,
}

/// Storage for code artifacts
pub trait ArtifactStore: Send + Sync {
    /// Driver identifier for logging and instance metadata
    fn driver(&self) -> &'static str;

    /// Paths matching a glob such as `/models/**/*.sql`, sorted
    fn list(&self, pattern: &str) -> CoreResult<Vec<String>>;

    /// Read an artifact; `Ok(None)` when it does not exist
    fn get(&self, path: &str) -> CoreResult<Option<Artifact>>;

    /// Write an artifact, creating parent directories as needed
    fn put(&self, path: &str, blob: &str, create_only: bool) -> CoreResult<()>;

    /// Move an artifact to a new path
    fn rename(&self, from: &str, to: &str) -> CoreResult<()>;

    /// Remove an artifact
    fn delete(&self, path: &str) -> CoreResult<()>;

    /// Every path that looks like an artifact (config files excluded), sorted
    fn list_artifacts(&self) -> CoreResult<Vec<String>> {
        let mut paths = Vec::new();
        for pattern in ARTIFACT_GLOBS {
            paths.extend(self.list(pattern)?);
        }
        paths.retain(|p| !CONFIG_FILE_NAMES.contains(&p.as_str()));
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

/// Normalize a path to `/a/b.sql` form, rejecting empty paths and `..`.
pub fn normalize_path(path: &str) -> CoreResult<String> {
    let unified = path.replace('\\', "/");
    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(CoreError::InvalidPath {
                    path: path.to_string(),
                    reason: "parent directory references are not allowed".into(),
                })
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(CoreError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".into(),
        });
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Name of the entry an artifact at `path` declares: its file stem.
pub fn entry_name_for_path(path: &str) -> Option<EntryName> {
    let file = path.rsplit('/').next()?;
    let stem = match file.rfind('.') {
        Some(0) | None => file,
        Some(idx) => &file[..idx],
    };
    EntryName::parse(stem)
}

/// Lightweight view that reads only the `kind` field of a YAML artifact
#[derive(Debug, Deserialize)]
struct KindHeader {
    #[serde(default)]
    kind: Option<String>,
}

/// Decide which kind of entry an artifact declares.
///
/// `.sql` files are models. YAML files are routed by an explicit `kind`
/// field, falling back to the directory they live in. Returns `None` for
/// files that are not artifacts.
pub fn detect_kind(path: &str, blob: &str) -> Option<EntryKind> {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".sql") {
        return Some(EntryKind::Model);
    }
    if !(lower.ends_with(".yaml") || lower.ends_with(".yml")) {
        return None;
    }

    if let Ok(KindHeader { kind: Some(kind) }) = serde_yaml::from_str::<KindHeader>(blob) {
        match kind.to_ascii_lowercase().replace('-', "_").as_str() {
            "source" => return Some(EntryKind::Source),
            "model" => return Some(EntryKind::Model),
            "metrics_view" | "metricsview" | "dashboard" => return Some(EntryKind::MetricsView),
            "table" => return Some(EntryKind::Table),
            _ => {}
        }
    }

    let dir = lower.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    let in_dir = |name: &str| dir.split('/').any(|part| part == name);
    if in_dir("sources") {
        Some(EntryKind::Source)
    } else if in_dir("dashboards") || in_dir("metrics") {
        Some(EntryKind::MetricsView)
    } else if in_dir("tables") {
        Some(EntryKind::Table)
    } else if in_dir("models") {
        Some(EntryKind::Model)
    } else {
        None
    }
}

/// Artifact store backed by a directory on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> CoreResult<PathBuf> {
        let normalized = normalize_path(path)?;
        Ok(self.root.join(normalized.trim_start_matches('/')))
    }

    fn to_artifact_path(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str()?;
                    // Hidden directories hold state, not artifacts
                    if part.starts_with('.') {
                        return None;
                    }
                    parts.push(part.to_string());
                }
                _ => return None,
            }
        }
        Some(format!("/{}", parts.join("/")))
    }
}

impl ArtifactStore for FileStore {
    fn driver(&self) -> &'static str {
        "file"
    }

    fn list(&self, pattern: &str) -> CoreResult<Vec<String>> {
        let full = self.root.join(pattern.trim_start_matches('/'));
        let full = full.to_string_lossy().to_string();
        let entries = glob::glob(&full).map_err(|e| CoreError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(p) if p.is_file() => {
                    if let Some(path) = self.to_artifact_path(&p) {
                        paths.push(path);
                    }
                }
                Ok(_) => {}
                Err(e) => log::warn!("Cannot read {}: {}", e.path().display(), e),
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn get(&self, path: &str) -> CoreResult<Option<Artifact>> {
        let full = self.resolve(path)?;
        let blob = match std::fs::read_to_string(&full) {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CoreError::IoWithPath {
                    path: full.display().to_string(),
                    source: e,
                })
            }
        };
        let updated_on = std::fs::metadata(&full)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(Some(Artifact {
            path: normalize_path(path)?,
            blob,
            updated_on,
        }))
    }

    /// Writes go to a temp file that is renamed into place, so readers never
    /// see a partially written artifact.
    fn put(&self, path: &str, blob: &str, create_only: bool) -> CoreResult<()> {
        let full = self.resolve(path)?;
        if create_only && full.exists() {
            return Err(CoreError::ArtifactExists {
                path: normalize_path(path)?,
            });
        }
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::IoWithPath {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp = full.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
        std::fs::write(&temp, blob).map_err(|e| CoreError::IoWithPath {
            path: temp.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&temp, &full).map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            CoreError::IoWithPath {
                path: full.display().to_string(),
                source: e,
            }
        })
    }

    fn rename(&self, from: &str, to: &str) -> CoreResult<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if !src.exists() {
            return Err(CoreError::ArtifactNotFound {
                path: normalize_path(from)?,
            });
        }
        if dst.exists() {
            return Err(CoreError::ArtifactExists {
                path: normalize_path(to)?,
            });
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&src, &dst).map_err(|e| CoreError::IoWithPath {
            path: src.display().to_string(),
            source: e,
        })
    }

    fn delete(&self, path: &str) -> CoreResult<()> {
        let full = self.resolve(path)?;
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::ArtifactNotFound {
                path: normalize_path(path)?,
            }),
            Err(e) => Err(CoreError::IoWithPath {
                path: full.display().to_string(),
                source: e,
            }),
        }
    }
}

/// Artifact store held entirely in memory
#[derive(Debug, Default)]
pub struct MemStore {
    files: RwLock<BTreeMap<String, Artifact>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(path, blob)` pairs
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> CoreResult<Self> {
        let store = Self::new();
        for (path, blob) in files {
            store.put(path, blob, false)?;
        }
        Ok(store)
    }
}

impl ArtifactStore for MemStore {
    fn driver(&self) -> &'static str {
        "memory"
    }

    fn list(&self, pattern: &str) -> CoreResult<Vec<String>> {
        let pattern = glob::Pattern::new(pattern).map_err(|e| CoreError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..glob::MatchOptions::default()
        };
        let files = self.files.read().unwrap_or_else(|p| p.into_inner());
        Ok(files
            .keys()
            .filter(|path| pattern.matches_with(path, options))
            .cloned()
            .collect())
    }

    fn get(&self, path: &str) -> CoreResult<Option<Artifact>> {
        let path = normalize_path(path)?;
        let files = self.files.read().unwrap_or_else(|p| p.into_inner());
        Ok(files.get(&path).cloned())
    }

    fn put(&self, path: &str, blob: &str, create_only: bool) -> CoreResult<()> {
        let path = normalize_path(path)?;
        let mut files = self.files.write().unwrap_or_else(|p| p.into_inner());
        if create_only && files.contains_key(&path) {
            return Err(CoreError::ArtifactExists { path });
        }
        files.insert(
            path.clone(),
            Artifact {
                path,
                blob: blob.to_string(),
                updated_on: Utc::now(),
            },
        );
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> CoreResult<()> {
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        let mut files = self.files.write().unwrap_or_else(|p| p.into_inner());
        if files.contains_key(&to) {
            return Err(CoreError::ArtifactExists { path: to });
        }
        let mut artifact = files
            .remove(&from)
            .ok_or(CoreError::ArtifactNotFound { path: from })?;
        artifact.path = to.clone();
        artifact.updated_on = Utc::now();
        files.insert(to, artifact);
        Ok(())
    }

    fn delete(&self, path: &str) -> CoreResult<()> {
        let path = normalize_path(path)?;
        let mut files = self.files.write().unwrap_or_else(|p| p.into_inner());
        match files.remove(&path) {
            Some(_) => Ok(()),
            None => Err(CoreError::ArtifactNotFound { path }),
        }
    }
}

#[cfg(test)]
#[path = "artifact_test.rs"]
mod tests;
