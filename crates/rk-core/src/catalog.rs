//! Per-instance catalog of resolved entries
//!
//! The catalog is a sequence of immutable generations. Readers take a
//! [`CatalogSnapshot`] and keep seeing it even while a reconcile commits
//! newer generations, so a reader observes each entry either before or
//! after a commit, never in between. Writers stage changes in a
//! [`CatalogTxn`] and [`Catalog::commit`] swaps in the next generation.

use crate::dag::DependencyGraph;
use crate::entry::{CatalogEntry, EntryKind};
use crate::entry_name::EntryName;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// One immutable generation of the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    generation: u64,
    entries: BTreeMap<EntryName, CatalogEntry>,

    /// Artifact path -> owning entry
    #[serde(skip)]
    by_path: BTreeMap<String, EntryName>,

    /// Artifact path -> names it referenced that did not exist when it failed
    #[serde(default)]
    unresolved: BTreeMap<String, BTreeSet<String>>,
}

impl CatalogSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Entry by name, matched case-insensitively
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name.to_ascii_lowercase().as_str())
    }

    pub fn get_by_path(&self, path: &str) -> Option<&CatalogEntry> {
        self.by_path.get(path).and_then(|name| self.entries.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name.to_ascii_lowercase().as_str())
    }

    /// All entries, ordered by name
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn entries_of_kind(&self, kind: EntryKind) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values().filter(move |e| e.kind() == kind)
    }

    pub fn names(&self) -> impl Iterator<Item = &EntryName> {
        self.entries.keys()
    }

    /// Paths of all artifact-backed entries, sorted
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.by_path.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unresolved_paths(&self) -> impl Iterator<Item = &str> {
        self.unresolved.keys().map(String::as_str)
    }

    pub fn unresolved_entries(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.unresolved.iter()
    }

    /// Names `path` was waiting for when it last failed
    pub fn unresolved_for(&self, path: &str) -> Option<&BTreeSet<String>> {
        self.unresolved.get(path)
    }

    /// Dependency graph derived from the entry specs
    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::build(
            self.entries
                .values()
                .map(|e| (e.name.clone(), e.spec.references())),
        )
    }

    fn rebuild_path_index(&mut self) -> CoreResult<()> {
        let mut by_path = BTreeMap::new();
        for entry in self.entries.values() {
            let Some(path) = &entry.path else { continue };
            if let Some(other) = by_path.insert(path.clone(), entry.name.clone()) {
                return Err(CoreError::DuplicateEntry {
                    name: entry.name.to_string(),
                    path1: format!("{path} (owned by {other})"),
                    path2: path.clone(),
                });
            }
        }
        self.by_path = by_path;
        Ok(())
    }

    /// Recompute parents/children of every entry from the specs, so no edge
    /// can name an entry outside this generation.
    fn relink(&mut self) -> CoreResult<()> {
        let graph = self.graph();
        if let Some(cycle) = graph.cycles().into_iter().next() {
            let names: Vec<String> = cycle.iter().map(|n| n.to_string()).collect();
            return Err(CoreError::CircularDependency {
                cycle: names.join(" -> "),
            });
        }
        for entry in self.entries.values_mut() {
            entry.parents = graph.parents(&entry.name);
            entry.children = graph.children(&entry.name);
        }
        Ok(())
    }
}

/// Staged catalog changes, applied atomically by [`Catalog::commit`]
#[derive(Debug, Default)]
pub struct CatalogTxn {
    upserts: Vec<CatalogEntry>,
    removals: Vec<EntryName>,
    unresolved: BTreeMap<String, Option<BTreeSet<String>>>,
}

impl CatalogTxn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn upsert(&mut self, entry: CatalogEntry) -> &mut Self {
        self.upserts.push(entry);
        self
    }

    /// Remove an entry by name (no-op when absent)
    pub fn remove(&mut self, name: EntryName) -> &mut Self {
        self.removals.push(name);
        self
    }

    /// Remember that `path` is waiting for `names` to exist
    pub fn mark_unresolved(&mut self, path: &str, names: BTreeSet<String>) -> &mut Self {
        self.unresolved.insert(path.to_string(), Some(names));
        self
    }

    pub fn clear_unresolved(&mut self, path: &str) -> &mut Self {
        self.unresolved.insert(path.to_string(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty() && self.unresolved.is_empty()
    }
}

/// Authoritative per-instance registry of catalog entries
#[derive(Debug, Default)]
pub struct Catalog {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a catalog from persisted entries
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> CoreResult<Self> {
        let mut snapshot = snapshot;
        snapshot.rebuild_path_index()?;
        snapshot.relink()?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The current generation. Cheap; holds no lock after returning.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    pub fn get(&self, name: &str) -> Option<CatalogEntry> {
        self.snapshot().get(name).cloned()
    }

    pub fn get_by_path(&self, path: &str) -> Option<CatalogEntry> {
        self.snapshot().get_by_path(path).cloned()
    }

    /// Apply `txn` and publish the result as a new generation.
    ///
    /// Removals are applied before upserts. The commit is rejected, leaving
    /// the current generation untouched, if it would give two entries the
    /// same path or introduce a dependency cycle.
    pub fn commit(&self, txn: CatalogTxn) -> CoreResult<u64> {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        if txn.is_empty() {
            return Ok(guard.generation);
        }

        let mut next = CatalogSnapshot::clone(&guard);
        for name in &txn.removals {
            next.entries.remove(name);
        }
        for entry in txn.upserts {
            next.entries.insert(entry.name.clone(), entry);
        }
        for (path, names) in txn.unresolved {
            match names {
                Some(names) => {
                    next.unresolved.insert(path, names);
                }
                None => {
                    next.unresolved.remove(&path);
                }
            }
        }
        next.rebuild_path_index()?;
        next.relink()?;
        next.generation += 1;

        log::debug!(
            "Catalog generation {} committed ({} entries)",
            next.generation,
            next.entries.len()
        );
        let generation = next.generation;
        *guard = Arc::new(next);
        Ok(generation)
    }

    /// Drop every entry, e.g. when the instance's OLAP store is replaced
    pub fn clear(&self) {
        let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
        let generation = guard.generation + 1;
        *guard = Arc::new(CatalogSnapshot {
            generation,
            ..CatalogSnapshot::default()
        });
    }
}

#[cfg(test)]
#[path = "catalog_test.rs"]
mod tests;
