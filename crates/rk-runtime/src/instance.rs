//! Instances and the registry that owns them
//!
//! An [`Instance`] is the unit of isolation: one catalog, one OLAP
//! connection, one artifact store and one variable map. Runs against the
//! same instance are serialized by its reconcile lock; different instances
//! share nothing and reconcile concurrently.

use crate::error::{RuntimeError, RuntimeResult};
use crate::persist::{CatalogStore, JsonCatalogStore, OlapCatalogStore, CATALOG_TABLE};
use crate::reconciler::{ReconcileOptions, Reconciler};
use crate::template::TemplateEngine;
use chrono::{DateTime, Utc};
use rk_core::{
    normalize_path, ArtifactStore, Catalog, CatalogEntry, CatalogSnapshot, CatalogTxn,
    CoreError, EntryName, EntrySpec, FileStore, MemStore, OlapDriver, ReconcileResult, TableSpec,
};
use rk_db::{Database, DuckDbBackend, RelationKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Where an instance's artifacts live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoDriver {
    /// A directory on disk; the DSN is its path
    #[default]
    File,
    /// An in-process map, empty on creation
    Memory,
}

impl std::fmt::Display for RepoDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoDriver::File => write!(f, "file"),
            RepoDriver::Memory => write!(f, "memory"),
        }
    }
}

/// Everything needed to open an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub olap_driver: OlapDriver,
    /// DuckDB file path or `:memory:`
    pub olap_dsn: String,
    #[serde(default)]
    pub repo_driver: RepoDriver,
    #[serde(default)]
    pub repo_dsn: String,
    #[serde(default)]
    pub embed_catalog: bool,
    /// Directory for `catalog.json`; no persistence when absent and not embedded
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

fn default_threads() -> usize {
    1
}

impl InstanceConfig {
    /// In-memory OLAP and artifact store, nothing persisted
    pub fn in_memory() -> Self {
        Self {
            id: None,
            olap_driver: OlapDriver::DuckDb,
            olap_dsn: ":memory:".to_string(),
            repo_driver: RepoDriver::Memory,
            repo_dsn: String::new(),
            embed_catalog: false,
            state_dir: None,
            threads: 1,
            vars: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn validate(&self) -> RuntimeResult<()> {
        let invalid = |message: String| Err(RuntimeError::InvalidInstance { message });
        if self.olap_dsn.trim().is_empty() {
            return invalid("olap_dsn must not be empty".to_string());
        }
        if self.repo_driver == RepoDriver::File && self.repo_dsn.trim().is_empty() {
            return invalid("a file repo needs repo_dsn set to its root directory".to_string());
        }
        if self.threads == 0 {
            return invalid("threads must be at least 1".to_string());
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return invalid("instance id must not be empty".to_string());
            }
        }
        Ok(())
    }

    fn olap_path(&self) -> Option<PathBuf> {
        (self.olap_dsn != ":memory:").then(|| PathBuf::from(&self.olap_dsn))
    }

    fn same_olap(&self, other: &InstanceConfig) -> bool {
        self.olap_driver == other.olap_driver && self.olap_dsn == other.olap_dsn
    }
}

/// Isolation unit owning one catalog, one OLAP connection and one repo
pub struct Instance {
    id: String,
    config: InstanceConfig,
    olap: Arc<dyn Database>,
    repo: Arc<dyn ArtifactStore>,
    catalog: Catalog,
    catalog_store: Option<Box<dyn CatalogStore>>,
    vars: RwLock<BTreeMap<String, String>>,
    threads: usize,
    base_dir: Option<PathBuf>,
    reconcile_lock: Mutex<()>,
    /// Set once a registry edit or delete supersedes this handle
    retired: AtomicBool,
    created_on: DateTime<Utc>,
}

impl Instance {
    /// Assemble an instance from ready-made parts, with an empty catalog
    /// that is not persisted.
    pub fn new(id: impl Into<String>, olap: Arc<dyn Database>, repo: Arc<dyn ArtifactStore>) -> Self {
        let mut config = InstanceConfig::in_memory();
        config.repo_driver = match repo.driver() {
            "file" => RepoDriver::File,
            _ => RepoDriver::Memory,
        };
        let id = id.into();
        config.id = Some(id.clone());
        Self {
            id,
            config,
            olap,
            repo,
            catalog: Catalog::new(),
            catalog_store: None,
            vars: RwLock::new(BTreeMap::new()),
            threads: 1,
            base_dir: None,
            reconcile_lock: Mutex::new(()),
            retired: AtomicBool::new(false),
            created_on: Utc::now(),
        }
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.config.vars = vars.clone();
        self.vars = RwLock::new(vars);
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self.config.threads = self.threads;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn with_catalog_store(mut self, store: Box<dyn CatalogStore>) -> Self {
        self.catalog_store = Some(store);
        self
    }

    /// Replace the empty catalog with a restored one
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Open connections described by `config` and restore the persisted
    /// catalog, if any.
    pub async fn open(config: InstanceConfig) -> RuntimeResult<Self> {
        Self::open_with(config, None).await
    }

    /// Like [`open`](Self::open), reusing `olap` instead of connecting again
    async fn open_with(
        config: InstanceConfig,
        olap: Option<Arc<dyn Database>>,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let olap: Arc<dyn Database> = match (olap, config.olap_driver) {
            (Some(olap), _) => olap,
            (None, OlapDriver::DuckDb) => match config.olap_path() {
                Some(path) => {
                    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                        std::fs::create_dir_all(parent).map_err(|e| RuntimeError::IoWithPath {
                            path: parent.display().to_string(),
                            source: e,
                        })?;
                    }
                    Arc::new(DuckDbBackend::from_path(&path)?)
                }
                None => Arc::new(DuckDbBackend::in_memory()?),
            },
        };

        let (repo, base_dir): (Arc<dyn ArtifactStore>, Option<PathBuf>) = match config.repo_driver {
            RepoDriver::File => {
                let root = PathBuf::from(&config.repo_dsn);
                (Arc::new(FileStore::new(&root)), Some(root))
            }
            RepoDriver::Memory => (Arc::new(MemStore::new()), None),
        };

        let catalog_store: Option<Box<dyn CatalogStore>> = if config.embed_catalog {
            Some(Box::new(OlapCatalogStore::new(Arc::clone(&olap))))
        } else {
            config
                .state_dir
                .as_ref()
                .map(|dir| Box::new(JsonCatalogStore::new(dir)) as Box<dyn CatalogStore>)
        };

        let catalog = match &catalog_store {
            Some(store) => match store.load().await? {
                Some(snapshot) => {
                    log::debug!(
                        "Restored catalog generation {} from {}",
                        snapshot.generation(),
                        store.describe()
                    );
                    Catalog::from_snapshot(snapshot)?
                }
                None => Catalog::new(),
            },
            None => Catalog::new(),
        };

        log::info!(
            "Opened instance {} (olap={} {}, repo={} {})",
            id,
            config.olap_driver,
            config.olap_dsn,
            config.repo_driver,
            config.repo_dsn
        );
        Ok(Self {
            id,
            vars: RwLock::new(config.vars.clone()),
            threads: config.threads.max(1),
            olap,
            repo,
            catalog,
            catalog_store,
            base_dir,
            reconcile_lock: Mutex::new(()),
            retired: AtomicBool::new(false),
            created_on: Utc::now(),
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn olap(&self) -> &Arc<dyn Database> {
        &self.olap
    }

    pub fn repo(&self) -> &Arc<dyn ArtifactStore> {
        &self.repo
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Consistent read view of the catalog
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.catalog.snapshot()
    }

    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    pub fn vars(&self) -> BTreeMap<String, String> {
        self.vars.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Replace the variable map; takes effect on the next run
    pub fn set_vars(&self, vars: BTreeMap<String, String>) {
        *self.vars.write().unwrap_or_else(|p| p.into_inner()) = vars;
    }

    /// Reconcile the catalog with the artifact store.
    pub async fn reconcile(&self, options: ReconcileOptions) -> RuntimeResult<ReconcileResult> {
        let _guard = self.reconcile_lock.lock().await;
        self.ensure_active()?;
        self.reconcile_locked(&options).await
    }

    /// Write an artifact and reconcile it.
    ///
    /// Without `create` the artifact must already exist; with `create_only`
    /// it must not.
    pub async fn put_file_and_reconcile(
        &self,
        path: &str,
        blob: &str,
        create: bool,
        create_only: bool,
        dry: bool,
        strict: bool,
    ) -> RuntimeResult<ReconcileResult> {
        let path = normalize_path(path)?;
        let _guard = self.reconcile_lock.lock().await;
        self.ensure_active()?;
        if !create && self.repo.get(&path)?.is_none() {
            return Err(CoreError::ArtifactNotFound { path }.into());
        }
        self.repo.put(&path, blob, create_only)?;
        let options = ReconcileOptions::changed([path])
            .with_dry(dry)
            .with_strict(strict);
        self.reconcile_locked(&options).await
    }

    /// Delete an artifact and reconcile the removal.
    pub async fn delete_file_and_reconcile(
        &self,
        path: &str,
        dry: bool,
        strict: bool,
    ) -> RuntimeResult<ReconcileResult> {
        let path = normalize_path(path)?;
        let _guard = self.reconcile_lock.lock().await;
        self.ensure_active()?;
        self.repo.delete(&path)?;
        let options = ReconcileOptions::changed([path])
            .with_dry(dry)
            .with_strict(strict);
        self.reconcile_locked(&options).await
    }

    /// Move an artifact and reconcile both paths.
    pub async fn rename_file_and_reconcile(
        &self,
        from: &str,
        to: &str,
        dry: bool,
        strict: bool,
    ) -> RuntimeResult<ReconcileResult> {
        let from = normalize_path(from)?;
        let to = normalize_path(to)?;
        let _guard = self.reconcile_lock.lock().await;
        self.ensure_active()?;
        self.repo.rename(&from, &to)?;
        let options = ReconcileOptions::changed([from, to])
            .with_dry(dry)
            .with_strict(strict);
        self.reconcile_locked(&options).await
    }

    /// Re-migrate one artifact even though it is unchanged, e.g. to
    /// re-ingest a source.
    pub async fn refresh_and_reconcile(
        &self,
        path: &str,
        dry: bool,
        strict: bool,
    ) -> RuntimeResult<ReconcileResult> {
        let path = normalize_path(path)?;
        let _guard = self.reconcile_lock.lock().await;
        self.ensure_active()?;
        let options = ReconcileOptions::changed([path.clone()])
            .with_forced([path])
            .with_dry(dry)
            .with_strict(strict);
        self.reconcile_locked(&options).await
    }

    /// Whether a registry edit or delete has superseded this handle
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn ensure_active(&self) -> RuntimeResult<()> {
        if self.is_retired() {
            return Err(RuntimeError::InstanceRetired {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    async fn reconcile_locked(&self, options: &ReconcileOptions) -> RuntimeResult<ReconcileResult> {
        let before = self.catalog.snapshot().generation();
        let result = Reconciler::new(&self.catalog, self.repo.as_ref(), Arc::clone(&self.olap))
            .with_templates(TemplateEngine::new(self.vars()))
            .with_threads(self.threads)
            .with_base_dir(self.base_dir.clone())
            .run(options)
            .await?;
        if !options.dry {
            self.persist_if_changed(before).await?;
        }
        Ok(result)
    }

    async fn persist_if_changed(&self, before: u64) -> RuntimeResult<()> {
        let snapshot = self.catalog.snapshot();
        if snapshot.generation() == before {
            return Ok(());
        }
        if let Some(store) = &self.catalog_store {
            store.save(&snapshot).await?;
        }
        Ok(())
    }

    /// Register OLAP tables no entry manages as embedded, unmanaged table
    /// entries, and forget embedded entries whose table is gone.
    ///
    /// Returns the number of entries added or removed.
    pub async fn sync_olap_tables(&self) -> RuntimeResult<usize> {
        let _guard = self.reconcile_lock.lock().await;
        self.ensure_active()?;
        let before = self.catalog.snapshot();
        let relations = self.olap.list_relations().await?;
        let present: BTreeSet<String> =
            relations.iter().map(|r| r.name.to_ascii_lowercase()).collect();

        let mut txn = CatalogTxn::new();
        let mut changes = 0;
        let now = Utc::now();
        for relation in &relations {
            if relation.kind != RelationKind::Table
                || relation.name.eq_ignore_ascii_case(CATALOG_TABLE)
                || before.contains(&relation.name)
            {
                continue;
            }
            let Some(name) = EntryName::parse(&relation.name) else {
                log::warn!("Ignoring OLAP table with unsupported name '{}'", relation.name);
                continue;
            };
            let columns = self.olap.describe(&relation.name).await?;
            let spec = EntrySpec::Table(TableSpec {
                managed: false,
                columns,
            });
            txn.upsert(CatalogEntry::embedded(name, spec, now));
            changes += 1;
        }
        for entry in before.entries().filter(|e| e.embedded) {
            if !present.contains(entry.name.as_str()) {
                log::warn!("Embedded table {} no longer exists; removing it", entry.name);
                txn.remove(entry.name.clone());
                changes += 1;
            }
        }

        self.catalog.commit(txn)?;
        self.persist_if_changed(before.generation()).await?;
        log::debug!("Synced OLAP tables for {}: {} changes", self.id, changes);
        Ok(changes)
    }

    /// Forget the catalog, in memory and wherever it is persisted
    async fn destroy(&self) -> RuntimeResult<()> {
        let _guard = self.reconcile_lock.lock().await;
        self.ensure_active()?;
        if let Some(store) = &self.catalog_store {
            store.clear().await?;
        }
        self.catalog.clear();
        self.retire();
        Ok(())
    }
}

/// Remove a DuckDB file and its write-ahead log
fn remove_database_files(path: &Path) -> RuntimeResult<()> {
    let wal = PathBuf::from(format!("{}.wal", path.display()));
    for file in [path.to_path_buf(), wal] {
        match std::fs::remove_file(&file) {
            Ok(()) => log::debug!("Removed {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RuntimeError::IoWithPath {
                    path: file.display().to_string(),
                    source: e,
                })
            }
        }
    }
    Ok(())
}

/// Process-wide set of instances, keyed by id
#[derive(Default)]
pub struct InstanceRegistry {
    instances: RwLock<BTreeMap<String, Arc<Instance>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open and register a new instance
    pub async fn create(&self, config: InstanceConfig) -> RuntimeResult<Arc<Instance>> {
        if let Some(id) = &config.id {
            if self.contains(id) {
                return Err(RuntimeError::InstanceExists { id: id.clone() });
            }
        }
        let instance = Instance::open(config).await?;
        self.insert(instance)
    }

    /// Register an instance assembled by the caller
    pub fn insert(&self, instance: Instance) -> RuntimeResult<Arc<Instance>> {
        let mut instances = self.instances.write().unwrap_or_else(|p| p.into_inner());
        if instances.contains_key(instance.id()) {
            return Err(RuntimeError::InstanceExists {
                id: instance.id().to_string(),
            });
        }
        let instance = Arc::new(instance);
        instances.insert(instance.id().to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(id)
    }

    pub fn get(&self, id: &str) -> RuntimeResult<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::InstanceNotFound { id: id.to_string() })
    }

    /// All instances, ordered by id
    pub fn list(&self) -> Vec<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Reopen an instance with new OLAP or repo settings.
    ///
    /// The catalog carries over when the OLAP database is the same one;
    /// otherwise it is restored from the new location's persisted catalog,
    /// or starts empty.
    pub async fn edit(&self, id: &str, config: InstanceConfig) -> RuntimeResult<Arc<Instance>> {
        let current = self.get(id)?;
        let _guard = current.reconcile_lock.lock().await;
        current.ensure_active()?;

        let mut config = config;
        config.id = Some(id.to_string());
        // A DuckDB file cannot be opened twice, so an unchanged OLAP
        // connection is shared with the replacement
        let carry_catalog = current.config.same_olap(&config);
        let olap = carry_catalog.then(|| Arc::clone(&current.olap));
        let mut replacement = Instance::open_with(config, olap).await?;
        if carry_catalog {
            let snapshot = CatalogSnapshot::clone(&current.catalog.snapshot());
            replacement = replacement.with_catalog(Catalog::from_snapshot(snapshot)?);
        }
        replacement.created_on = current.created_on;

        let replacement = Arc::new(replacement);
        self.instances
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.to_string(), Arc::clone(&replacement));
        // Runs queued on the old handle are rejected once they get the lock
        current.retire();
        log::info!("Edited instance {id} (catalog carried over: {carry_catalog})");
        Ok(replacement)
    }

    /// Replace an instance's variables; affects subsequent runs only
    pub fn edit_variables(&self, id: &str, vars: BTreeMap<String, String>) -> RuntimeResult<()> {
        self.get(id)?.set_vars(vars);
        Ok(())
    }

    /// Unregister an instance, clearing its persisted catalog and
    /// optionally deleting its OLAP database file.
    pub async fn delete(&self, id: &str, drop_olap: bool) -> RuntimeResult<()> {
        let instance = self
            .instances
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
            .ok_or_else(|| RuntimeError::InstanceNotFound { id: id.to_string() })?;
        instance.destroy().await?;
        if drop_olap {
            let path = instance.config.olap_path();
            // Close our handle on the database before removing its files
            drop(instance);
            if let Some(path) = path {
                remove_database_files(&path)?;
            }
        }
        log::info!("Deleted instance {id}");
        Ok(())
    }
}

#[cfg(test)]
#[path = "instance_test.rs"]
mod tests;
