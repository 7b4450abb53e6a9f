//! Catalog persistence
//!
//! A catalog survives restarts through a [`CatalogStore`]. The default keeps
//! one JSON document in the instance's state directory; an instance created
//! with `embed_catalog` keeps its entries inside the OLAP database instead,
//! so the database file carries its own catalog.

use crate::error::{RuntimeError, RuntimeResult};
use async_trait::async_trait;
use rk_core::{CatalogEntry, CatalogSnapshot};
use rk_db::{quote_literal, Database};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the OLAP table used by [`OlapCatalogStore`]
pub const CATALOG_TABLE: &str = "rk_catalog";

/// File name used by [`JsonCatalogStore`] inside the state directory
pub const CATALOG_FILE: &str = "catalog.json";

/// Row key of the run-wide state inside [`CATALOG_TABLE`]; never a valid entry name
const STATE_ROW: &str = ".state";

/// Loads and saves catalog snapshots
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// The last saved snapshot, or `None` if nothing was saved yet
    async fn load(&self) -> RuntimeResult<Option<CatalogSnapshot>>;

    async fn save(&self, snapshot: &CatalogSnapshot) -> RuntimeResult<()>;

    /// Forget the persisted catalog
    async fn clear(&self) -> RuntimeResult<()>;

    fn describe(&self) -> String;
}

/// Catalog kept as `<state_dir>/catalog.json`
#[derive(Debug, Clone)]
pub struct JsonCatalogStore {
    path: PathBuf,
}

impl JsonCatalogStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(CATALOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalogStore for JsonCatalogStore {
    async fn load(&self) -> RuntimeResult<Option<CatalogSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| RuntimeError::IoWithPath {
            path: self.path.display().to_string(),
            source: e,
        })?;
        let snapshot = serde_json::from_str(&content).map_err(|e| RuntimeError::CatalogStore {
            message: format!("{} is corrupt: {e}", self.path.display()),
        })?;
        Ok(Some(snapshot))
    }

    /// Write-to-temp-then-rename, so a crash never leaves a torn file
    async fn save(&self, snapshot: &CatalogSnapshot) -> RuntimeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RuntimeError::IoWithPath {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&temp_path, &json).map_err(|e| RuntimeError::IoWithPath {
            path: temp_path.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            RuntimeError::IoWithPath {
                path: self.path.display().to_string(),
                source: e,
            }
        })?;
        log::debug!(
            "Saved catalog generation {} to {}",
            snapshot.generation(),
            self.path.display()
        );
        Ok(())
    }

    async fn clear(&self) -> RuntimeResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::IoWithPath {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Run-wide part of a snapshot stored next to the entry rows
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateRow {
    generation: u64,
    #[serde(default)]
    unresolved: BTreeMap<String, BTreeSet<String>>,
}

/// Same field names as the snapshot's own serialized form
#[derive(Serialize)]
struct SnapshotParts {
    generation: u64,
    entries: BTreeMap<String, CatalogEntry>,
    unresolved: BTreeMap<String, BTreeSet<String>>,
}

/// Catalog kept in a `rk_catalog(name, payload)` table of the OLAP database
pub struct OlapCatalogStore {
    olap: Arc<dyn Database>,
}

impl OlapCatalogStore {
    pub fn new(olap: Arc<dyn Database>) -> Self {
        Self { olap }
    }

    async fn ensure_table(&self) -> RuntimeResult<()> {
        self.olap
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {CATALOG_TABLE} (name VARCHAR PRIMARY KEY, payload VARCHAR NOT NULL)"
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for OlapCatalogStore {
    async fn load(&self) -> RuntimeResult<Option<CatalogSnapshot>> {
        if !self.olap.relation_exists(CATALOG_TABLE).await? {
            return Ok(None);
        }
        let state_rows = self
            .olap
            .query_strings(&format!(
                "SELECT payload FROM {CATALOG_TABLE} WHERE name = {}",
                quote_literal(STATE_ROW)
            ))
            .await?;
        let Some(state) = state_rows.first() else {
            return Ok(None);
        };
        let corrupt = |e: serde_json::Error| RuntimeError::CatalogStore {
            message: format!("{CATALOG_TABLE} is corrupt: {e}"),
        };
        let state: StateRow = serde_json::from_str(state).map_err(corrupt)?;

        let payloads = self
            .olap
            .query_strings(&format!(
                "SELECT payload FROM {CATALOG_TABLE} WHERE name <> {} ORDER BY name",
                quote_literal(STATE_ROW)
            ))
            .await?;
        let mut entries = BTreeMap::new();
        for payload in payloads {
            let entry: CatalogEntry = serde_json::from_str(&payload).map_err(corrupt)?;
            entries.insert(entry.name.to_string(), entry);
        }

        let parts = SnapshotParts {
            generation: state.generation,
            entries,
            unresolved: state.unresolved,
        };
        let snapshot = serde_json::to_value(parts)
            .and_then(serde_json::from_value)
            .map_err(corrupt)?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> RuntimeResult<()> {
        self.ensure_table().await?;

        let state = StateRow {
            generation: snapshot.generation(),
            unresolved: snapshot
                .unresolved_entries()
                .map(|(path, names)| (path.clone(), names.clone()))
                .collect(),
        };
        let mut rows = vec![format!(
            "({}, {})",
            quote_literal(STATE_ROW),
            quote_literal(&serde_json::to_string(&state)?)
        )];
        for entry in snapshot.entries() {
            rows.push(format!(
                "({}, {})",
                quote_literal(entry.name.as_str()),
                quote_literal(&serde_json::to_string(entry)?)
            ));
        }

        let sql = format!(
            "BEGIN TRANSACTION;\nDELETE FROM {CATALOG_TABLE};\nINSERT INTO {CATALOG_TABLE} VALUES {};\nCOMMIT;",
            rows.join(",\n")
        );
        if let Err(e) = self.olap.execute_batch(&sql).await {
            let _ = self.olap.execute_batch("ROLLBACK").await;
            return Err(e.into());
        }
        log::debug!(
            "Saved catalog generation {} to {} ({} entries)",
            snapshot.generation(),
            CATALOG_TABLE,
            snapshot.len()
        );
        Ok(())
    }

    async fn clear(&self) -> RuntimeResult<()> {
        self.olap.drop_if_exists(CATALOG_TABLE).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} table {}", self.olap.db_type(), CATALOG_TABLE)
    }
}

#[cfg(test)]
#[path = "persist_test.rs"]
mod tests;
