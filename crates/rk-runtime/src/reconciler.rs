//! The reconcile loop
//!
//! A run moves every affected artifact path through
//! `Pending -> Compiling -> Compiled -> Validating -> Validated -> Migrating -> Committed`,
//! or stops it in `CompileError`, `ValidationError` or `MigrationError`.
//! Dry runs stop in `Validated` and count it as success.
//!
//! Each migrated entry is committed to the catalog on its own, so readers
//! see every entry either as it was before the run or as it is after its
//! own migration. Deleted artifacts are torn down after all migrations.

use crate::error::RuntimeResult;
use crate::kinds::{handler_for, CompileContext, MigrateContext, Scope};
use crate::persist::CATALOG_TABLE;
use crate::template::TemplateEngine;
use chrono::Utc;
use rk_core::{
    compute_affected, detect_kind, entry_name_for_path, normalize_path, ArtifactStore, Catalog,
    CatalogEntry, CatalogSnapshot, CatalogTxn, Column, DependencyGraph, EntryName, EntrySpec,
    ErrorAggregator, ErrorCode, ReconcileError, ReconcileResult,
};
use rk_db::Database;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// What a run should look at and how
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Paths whose content changed; empty means every known path
    pub changed_paths: Vec<String>,
    /// Paths to migrate even when their content is unchanged
    pub forced_paths: Vec<String>,
    /// Validate only: no catalog or OLAP mutation
    pub dry: bool,
    /// Stop at the first error
    pub strict: bool,
}

impl ReconcileOptions {
    /// Reconcile every artifact
    pub fn full() -> Self {
        Self::default()
    }

    pub fn changed<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed_paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_forced<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forced_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dry(mut self, dry: bool) -> Self {
        self.dry = dry;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Progress of one affected path through a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Compiling,
    CompileError,
    Compiled,
    Validating,
    ValidationError,
    Validated,
    Migrating,
    MigrationError,
    Committed,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EntryState::CompileError
                | EntryState::ValidationError
                | EntryState::MigrationError
                | EntryState::Committed
        )
    }
}

/// Everything a run reads from and writes to
pub struct Reconciler<'a> {
    catalog: &'a Catalog,
    repo: &'a dyn ArtifactStore,
    olap: Arc<dyn Database>,
    templates: TemplateEngine,
    threads: usize,
    base_dir: Option<PathBuf>,
}

impl<'a> Reconciler<'a> {
    pub fn new(catalog: &'a Catalog, repo: &'a dyn ArtifactStore, olap: Arc<dyn Database>) -> Self {
        Self {
            catalog,
            repo,
            olap,
            templates: TemplateEngine::default(),
            threads: 1,
            base_dir: None,
        }
    }

    pub fn with_templates(mut self, templates: TemplateEngine) -> Self {
        self.templates = templates;
        self
    }

    /// Maximum concurrent migrations; 1 means sequential
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Directory relative local source paths are resolved against
    pub fn with_base_dir(mut self, base_dir: Option<PathBuf>) -> Self {
        self.base_dir = base_dir;
        self
    }

    /// Run one reconcile pass.
    ///
    /// Only infrastructure failures (the artifact store cannot be listed)
    /// are returned as `Err`; per-path problems are in the result.
    pub async fn run(&self, options: &ReconcileOptions) -> RuntimeResult<ReconcileResult> {
        let mut run = Run::new(self, options);

        let changed = run.normalize_all(&options.changed_paths);
        let forced = run.normalize_all(&options.forced_paths);
        let known = self.repo.list_artifacts()?;
        let affected = compute_affected(&run.snapshot, &changed, &forced, &known);
        log::debug!(
            "Reconcile: {} affected paths (dry={}, strict={})",
            affected.len(),
            options.dry,
            options.strict
        );

        let forced: BTreeSet<String> = forced.into_iter().collect();
        run.compile_all(&affected, &forced);
        if !run.aborted {
            let graph = run.proposed_graph();
            run.reject_cycles(&graph);
            run.plan_renames();
            run.migrate_in_order(&graph).await;
        }
        run.apply_deletions().await;

        let unattempted = run
            .states
            .values()
            .filter(|s| **s == EntryState::Pending)
            .count();
        if run.aborted && unattempted > 0 {
            log::debug!("Strict run stopped with {unattempted} paths unattempted");
        }
        let start_generation = run.snapshot.generation();
        let result = run.errors.finish();
        log::info!(
            "Reconciled {} paths: {} errors, catalog generation {} -> {}",
            result.affected_paths.len(),
            result.errors.len(),
            start_generation,
            self.catalog.snapshot().generation()
        );
        Ok(result)
    }
}

/// A successfully compiled artifact waiting for its turn
struct Candidate {
    path: String,
    spec: EntrySpec,
    unchanged: bool,
}

struct MigrationJob {
    name: EntryName,
    path: String,
    spec: EntrySpec,
    /// Entry committed under this name before the run
    previous: Option<CatalogEntry>,
    /// Deleted entry whose OLAP object can be renamed into place
    rename_from: Option<CatalogEntry>,
}

struct MigrationOutcome {
    job: MigrationJob,
    renamed: bool,
    result: Result<Vec<Column>, Vec<ReconcileError>>,
}

/// Mutable state of a single pass
struct Run<'r, 'a> {
    rc: &'r Reconciler<'a>,
    options: &'r ReconcileOptions,
    snapshot: Arc<CatalogSnapshot>,
    errors: ErrorAggregator,
    states: BTreeMap<String, EntryState>,
    compiled: BTreeMap<EntryName, Candidate>,
    deletions: BTreeMap<EntryName, CatalogEntry>,
    /// New name -> deleted entry it takes over
    renames: BTreeMap<EntryName, CatalogEntry>,
    failed: BTreeSet<EntryName>,
    /// Names deleted, renamed away or torn down during this run
    removed: BTreeSet<String>,
    /// Entries migrated (or, when dry, validated with a new definition)
    migrated: BTreeSet<EntryName>,
    committed: BTreeSet<EntryName>,
    scope: Scope,
    aborted: bool,
}

impl<'r, 'a> Run<'r, 'a> {
    fn new(rc: &'r Reconciler<'a>, options: &'r ReconcileOptions) -> Self {
        Self {
            rc,
            options,
            snapshot: rc.catalog.snapshot(),
            errors: ErrorAggregator::new(),
            states: BTreeMap::new(),
            compiled: BTreeMap::new(),
            deletions: BTreeMap::new(),
            renames: BTreeMap::new(),
            failed: BTreeSet::new(),
            removed: BTreeSet::new(),
            migrated: BTreeSet::new(),
            committed: BTreeSet::new(),
            scope: Scope::new(),
            aborted: false,
        }
    }

    fn dry(&self) -> bool {
        self.options.dry
    }

    fn should_stop(&self) -> bool {
        self.options.strict && self.errors.has_errors()
    }

    fn normalize_all(&mut self, paths: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(paths.len());
        for raw in paths {
            match normalize_path(raw) {
                Ok(path) => out.push(path),
                Err(e) => {
                    self.errors
                        .push(ReconcileError::new(ErrorCode::Validation, raw.as_str(), e.to_string()));
                }
            }
        }
        out
    }

    fn transition(&mut self, path: &str, state: EntryState) {
        log::debug!("{path}: {state:?}");
        self.states.insert(path.to_string(), state);
        if state.is_terminal() || (state == EntryState::Validated && self.dry()) {
            self.errors.visit(path);
        }
    }

    fn fail(
        &mut self,
        path: &str,
        name: Option<&EntryName>,
        errors: Vec<ReconcileError>,
        state: EntryState,
    ) {
        if let Some(name) = name {
            self.failed.insert(name.clone());
        }
        self.errors.extend(errors);
        self.transition(path, state);
    }

    /// Commit `txn` unless the run is dry. Returns false if the catalog
    /// rejected it.
    fn commit(&mut self, path: &str, txn: CatalogTxn) -> bool {
        if self.dry() || txn.is_empty() {
            return true;
        }
        match self.rc.catalog.commit(txn) {
            Ok(_) => true,
            Err(e) => {
                self.errors
                    .push(ReconcileError::new(ErrorCode::Unspecified, path, e.to_string()));
                false
            }
        }
    }

    /// Whether the catalog currently holds an unresolved marker for `path`
    fn has_marker(&self, path: &str) -> bool {
        self.rc.catalog.snapshot().unresolved_for(path).is_some()
    }

    /// Record the references of a failed entry that matched no entry, so a
    /// later run creating one of them retries the path.
    fn remember_unresolved(&mut self, graph: &DependencyGraph, name: &EntryName, path: &str) {
        let Some(missing) = graph.unresolved(name.as_str()) else {
            return;
        };
        if missing.is_empty()
            || self.rc.catalog.snapshot().unresolved_for(path) == Some(missing)
        {
            return;
        }
        let mut txn = CatalogTxn::new();
        txn.mark_unresolved(path, missing.clone());
        self.commit(path, txn);
    }

    fn path_of(&self, name: &str) -> Option<String> {
        self.compiled
            .get(name)
            .map(|c| c.path.clone())
            .or_else(|| self.snapshot.get(name).and_then(|e| e.path.clone()))
    }

    // Compile phase

    fn compile_all(&mut self, affected: &[String], forced: &BTreeSet<String>) {
        for path in affected {
            self.states.insert(path.clone(), EntryState::Pending);
        }
        for path in affected {
            if self.should_stop() {
                self.aborted = true;
                return;
            }
            self.compile_path(path, forced.contains(path));
        }
    }

    fn compile_path(&mut self, path: &str, forced: bool) {
        let existing = self.snapshot.get_by_path(path).cloned();
        let artifact = match self.rc.repo.get(path) {
            Ok(artifact) => artifact,
            Err(e) => {
                let name = existing.map(|e| e.name);
                self.fail(
                    path,
                    name.as_ref(),
                    vec![ReconcileError::new(ErrorCode::Unspecified, path, e.to_string())],
                    EntryState::CompileError,
                );
                return;
            }
        };

        let Some(artifact) = artifact else {
            match existing {
                Some(entry) => self.schedule_deletion(entry),
                None => {
                    if self.has_marker(path) {
                        let mut txn = CatalogTxn::new();
                        txn.clear_unresolved(path);
                        self.commit(path, txn);
                    }
                    self.errors.visit(path);
                }
            }
            return;
        };

        let Some(kind) = detect_kind(path, &artifact.blob) else {
            match existing {
                Some(entry) => self.schedule_deletion(entry),
                None => log::debug!("Skipping {path}: not a recognised artifact"),
            }
            return;
        };
        self.transition(path, EntryState::Compiling);

        let Some(name) = entry_name_for_path(path) else {
            self.fail(
                path,
                None,
                vec![ReconcileError::new(
                    ErrorCode::Syntax,
                    path,
                    "file name is not a valid entry name (use letters, digits, '_' and '-')",
                )],
                EntryState::CompileError,
            );
            return;
        };

        if name.as_str() == CATALOG_TABLE {
            self.fail(
                path,
                None,
                vec![ReconcileError::new(
                    ErrorCode::Validation,
                    path,
                    format!("name '{name}' is reserved for the embedded catalog"),
                )],
                EntryState::CompileError,
            );
            return;
        }

        if let Some(conflict) = self.name_conflict(&name, path) {
            self.fail(
                path,
                None,
                vec![ReconcileError::new(
                    ErrorCode::Validation,
                    path,
                    format!("name '{name}' is already defined by {conflict}"),
                )],
                EntryState::CompileError,
            );
            return;
        }

        let ctx = CompileContext {
            path,
            name: &name,
            templates: &self.rc.templates,
        };
        match handler_for(kind).compile(&ctx, &artifact.blob) {
            Ok(spec) => {
                let unchanged = !forced
                    && existing.is_some_and(|e| {
                        e.name == name && e.kind() == kind && e.checksum == spec.checksum()
                    });
                self.compiled.insert(
                    name,
                    Candidate {
                        path: path.to_string(),
                        spec,
                        unchanged,
                    },
                );
                self.transition(path, EntryState::Compiled);
            }
            Err(errors) => self.fail(path, Some(&name), errors, EntryState::CompileError),
        }
    }

    /// Another live artifact that already owns `name`
    fn name_conflict(&self, name: &EntryName, path: &str) -> Option<String> {
        if let Some(other) = self.compiled.get(name) {
            return Some(other.path.clone());
        }
        let owner = self.snapshot.get(name.as_str())?;
        let owner_path = owner.path.as_deref()?;
        if owner_path == path {
            return None;
        }
        // An owner whose artifact is gone is being replaced, not conflicted with
        match self.rc.repo.get(owner_path) {
            Ok(Some(_)) => Some(owner_path.to_string()),
            _ => None,
        }
    }

    fn schedule_deletion(&mut self, entry: CatalogEntry) {
        log::debug!("Entry {} scheduled for deletion", entry.name);
        self.deletions.insert(entry.name.clone(), entry);
    }

    // Planning

    /// Committed entries minus deletions, overlaid with this run's specs
    fn proposed_graph(&self) -> DependencyGraph {
        let mut nodes: BTreeMap<EntryName, BTreeSet<String>> = self
            .snapshot
            .entries()
            .filter(|e| !self.deletions.contains_key(&e.name))
            .map(|e| (e.name.clone(), e.spec.references()))
            .collect();
        for (name, candidate) in &self.compiled {
            nodes.insert(name.clone(), candidate.spec.references());
        }
        DependencyGraph::build(nodes)
    }

    fn reject_cycles(&mut self, graph: &DependencyGraph) {
        let mut on_cycle = BTreeSet::new();
        for cycle in graph.cycles() {
            let label = cycle
                .iter()
                .chain(cycle.first())
                .map(EntryName::as_str)
                .collect::<Vec<_>>()
                .join(" -> ");
            for name in &cycle {
                on_cycle.insert(name.clone());
                let Some(path) = self.path_of(name.as_str()) else {
                    continue;
                };
                self.fail(
                    &path,
                    Some(name),
                    vec![ReconcileError::new(
                        ErrorCode::Dependency,
                        path.as_str(),
                        format!("circular dependency: {label}"),
                    )],
                    EntryState::ValidationError,
                );
            }
        }

        // Downstream of a cycle: never ordered, so report them here
        for name in graph.blocked() {
            if on_cycle.contains(&name) || !self.compiled.contains_key(&name) {
                continue;
            }
            let Some(path) = self.path_of(name.as_str()) else {
                continue;
            };
            self.fail(
                &path,
                Some(&name),
                vec![ReconcileError::new(
                    ErrorCode::Dependency,
                    path.as_str(),
                    "depends on a circular dependency",
                )],
                EntryState::ValidationError,
            );
        }
    }

    /// Pair new names with deleted entries of the same kind and definition,
    /// so their OLAP object is renamed instead of rebuilt.
    fn plan_renames(&mut self) {
        let mut pairs = Vec::new();
        let mut taken = BTreeSet::new();
        for (name, candidate) in &self.compiled {
            if self.failed.contains(name) || self.snapshot.contains(name.as_str()) {
                continue;
            }
            let kind = candidate.spec.kind();
            if !handler_for(kind).supports_rename() {
                continue;
            }
            let checksum = candidate.spec.checksum();
            let source = self.deletions.values().find(|old| {
                old.kind() == kind
                    && old.checksum == checksum
                    && !taken.contains(&old.name)
                    && !self.compiled.contains_key(&old.name)
            });
            if let Some(old) = source {
                taken.insert(old.name.clone());
                pairs.push((name.clone(), old.name.clone()));
            }
        }
        for (new_name, old_name) in pairs {
            if let Some(old) = self.deletions.remove(&old_name) {
                log::debug!("Entry {old_name} will be renamed to {new_name}");
                self.renames.insert(new_name, old);
            }
        }

        for name in self.deletions.keys().chain(self.renames.values().map(|e| &e.name)) {
            if !self.compiled.contains_key(name) {
                self.removed.insert(name.to_string());
            }
        }
        self.scope = Scope::from_entries(
            self.snapshot
                .entries()
                .filter(|e| !self.removed.contains(e.name.as_str())),
        );
    }

    // Validate and migrate

    async fn migrate_in_order(&mut self, graph: &DependencyGraph) {
        let work: BTreeSet<EntryName> = self
            .compiled
            .keys()
            .filter(|name| !self.failed.contains(*name))
            .cloned()
            .collect();
        let batches: Vec<Vec<EntryName>> = if self.rc.threads > 1 && !self.options.strict {
            graph
                .levels()
                .into_iter()
                .map(|level| level.into_iter().filter(|n| work.contains(n)).collect::<Vec<_>>())
                .filter(|level| !level.is_empty())
                .collect()
        } else {
            graph
                .topological_order()
                .into_iter()
                .filter(|n| work.contains(n))
                .map(|n| vec![n])
                .collect()
        };

        for batch in batches {
            let mut jobs = Vec::new();
            for name in batch {
                if self.should_stop() {
                    self.aborted = true;
                    return;
                }
                if let Some(job) = self.prepare(graph, &name).await {
                    jobs.push(job);
                }
            }
            for outcome in self.migrate_batch(jobs).await {
                self.apply(graph, outcome);
            }
        }
        if self.should_stop() {
            self.aborted = true;
        }
    }

    /// Decide what happens to one compiled entry; returns a job when it
    /// needs a migration.
    async fn prepare(&mut self, graph: &DependencyGraph, name: &EntryName) -> Option<MigrationJob> {
        let (path, spec, unchanged) = {
            let candidate = self.compiled.get(name)?;
            (candidate.path.clone(), candidate.spec.clone(), candidate.unchanged)
        };

        let gone: BTreeSet<String> = spec
            .references()
            .into_iter()
            .filter(|r| self.removed.contains(r))
            .collect();
        if !gone.is_empty() {
            self.tear_down(name, &path, gone).await;
            return None;
        }

        let references = spec.references();
        if let Some(parent) = self
            .failed
            .iter()
            .find(|f| references.contains(f.as_str()))
        {
            let error = ReconcileError::new(
                ErrorCode::Dependency,
                path.as_str(),
                format!("dependency '{parent}' failed"),
            );
            self.fail(&path, Some(name), vec![error], EntryState::ValidationError);
            return None;
        }

        let parents = graph.parents(name.as_str());
        if unchanged && !parents.iter().any(|p| self.migrated.contains(p)) {
            self.transition(&path, EntryState::Committed);
            return None;
        }

        self.transition(&path, EntryState::Validating);
        let handler = handler_for(spec.kind());
        let errors = handler.validate(&path, &spec, &self.scope);
        if !errors.is_empty() {
            self.fail(&path, Some(name), errors, EntryState::ValidationError);
            self.remember_unresolved(graph, name, &path);
            return None;
        }

        let previous = self.snapshot.get(name.as_str()).cloned();
        if self.dry() {
            let mut spec = spec;
            if let Some(prev) = previous.as_ref().filter(|p| p.kind() == spec.kind()) {
                spec.set_columns(prev.spec.columns().to_vec());
            }
            self.scope.insert(name.as_str(), &spec);
            if !unchanged {
                self.migrated.insert(name.clone());
            }
            self.transition(&path, EntryState::Validated);
            return None;
        }

        self.transition(&path, EntryState::Migrating);
        Some(MigrationJob {
            name: name.clone(),
            path,
            spec,
            previous,
            rename_from: self.renames.get(name).cloned(),
        })
    }

    /// Remove an entry whose dependency disappeared
    async fn tear_down(&mut self, name: &EntryName, path: &str, gone: BTreeSet<String>) {
        let missing = gone.iter().cloned().collect::<Vec<_>>().join("', '");
        log::debug!("Tearing down {name}: '{missing}' removed");
        if !self.dry() {
            if let Some(existing) = self.rc.catalog.get(name.as_str()) {
                if let Err(e) = handler_for(existing.kind())
                    .drop(self.rc.olap.as_ref(), &existing)
                    .await
                {
                    log::warn!("Failed to drop {} while tearing it down: {}", name, e);
                }
            }
            let mut txn = CatalogTxn::new();
            txn.remove(name.clone()).mark_unresolved(path, gone);
            self.commit(path, txn);
        }
        self.removed.insert(name.to_string());
        self.scope.remove(name.as_str());
        let error = ReconcileError::new(
            ErrorCode::Dependency,
            path,
            format!("dependency '{missing}' was removed"),
        );
        self.errors.push(error);
        self.transition(path, EntryState::ValidationError);
    }

    async fn migrate_batch(&mut self, jobs: Vec<MigrationJob>) -> Vec<MigrationOutcome> {
        let olap = &self.rc.olap;
        let base_dir = &self.rc.base_dir;
        if jobs.len() <= 1 || self.rc.threads <= 1 {
            let mut outcomes = Vec::with_capacity(jobs.len());
            for job in jobs {
                outcomes.push(run_migration(Arc::clone(olap), base_dir.clone(), job).await);
            }
            return outcomes;
        }

        let semaphore = Arc::new(Semaphore::new(self.rc.threads));
        let mut keys = Vec::with_capacity(jobs.len());
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            keys.push((job.name.clone(), job.path.clone()));
            let olap = Arc::clone(olap);
            let base_dir = base_dir.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok();
                run_migration(olap, base_dir, job).await
            }));
        }

        let joined = futures::future::join_all(handles).await;
        let mut outcomes = Vec::with_capacity(joined.len());
        for ((name, path), joined) in keys.into_iter().zip(joined) {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    log::warn!("Migration task for {} failed: {}", name, e);
                    let error = ReconcileError::new(
                        ErrorCode::Unspecified,
                        path.as_str(),
                        format!("migration task failed: {e}"),
                    );
                    self.fail(&path, Some(&name), vec![error], EntryState::MigrationError);
                }
            }
        }
        outcomes.sort_by(|a, b| a.job.name.cmp(&b.job.name));
        outcomes
    }

    fn apply(&mut self, graph: &DependencyGraph, outcome: MigrationOutcome) {
        let MigrationOutcome {
            job,
            renamed,
            result,
        } = outcome;
        let MigrationJob {
            name,
            path,
            mut spec,
            previous,
            rename_from,
        } = job;

        let columns = match result {
            Ok(columns) => columns,
            Err(errors) => {
                if let Some(old) = rename_from {
                    self.deletions.insert(old.name.clone(), old);
                }
                self.fail(&path, Some(&name), errors, EntryState::MigrationError);
                self.remember_unresolved(graph, &name, &path);
                return;
            }
        };

        spec.set_columns(columns);
        let now = Utc::now();
        let mut entry = CatalogEntry::new(name.clone(), path.clone(), spec, now);
        if let Some(created_on) = previous
            .as_ref()
            .or(rename_from.as_ref())
            .map(|e| e.created_on)
        {
            entry.created_on = created_on;
        }

        let mut txn = CatalogTxn::new();
        txn.upsert(entry.clone());
        if self.has_marker(&path) {
            txn.clear_unresolved(&path);
        }
        match rename_from {
            Some(old) if renamed => {
                txn.remove(old.name.clone());
                if let Some(old_path) = &old.path {
                    if self.has_marker(old_path) {
                        txn.clear_unresolved(old_path);
                    }
                    self.errors.visit(old_path);
                }
            }
            Some(old) => {
                self.deletions.insert(old.name.clone(), old);
            }
            None => {}
        }

        if self.commit(&path, txn) {
            self.scope.insert(name.as_str(), &entry.spec);
            self.migrated.insert(name.clone());
            self.committed.insert(name);
            self.transition(&path, EntryState::Committed);
        } else {
            self.failed.insert(name);
            self.transition(&path, EntryState::MigrationError);
        }
    }

    // Deletions

    /// Committed entries that still (transitively) read from `name`
    fn live_dependents(&self, name: &EntryName, deleting: &BTreeSet<EntryName>) -> Vec<EntryName> {
        self.rc
            .catalog
            .snapshot()
            .graph()
            .descendants(name.as_str())
            .into_iter()
            .filter(|n| !deleting.contains(n) && !self.removed.contains(n.as_str()))
            .collect()
    }

    async fn apply_deletions(&mut self) {
        // Renames that never happened fall back to plain deletions
        let renames = std::mem::take(&mut self.renames);
        for (new_name, old) in renames {
            if !self.committed.contains(&new_name) {
                self.deletions.insert(old.name.clone(), old);
            } else if let Some(old_path) = &old.path {
                self.errors.visit(old_path);
            }
        }

        let deletions = std::mem::take(&mut self.deletions);
        let deleting: BTreeSet<EntryName> = deletions.keys().cloned().collect();
        for (name, entry) in deletions {
            let path = entry.path.clone().unwrap_or_default();
            if self.committed.contains(&name) {
                // Reclaimed by an artifact at another path
                if self.has_marker(&path) {
                    let mut txn = CatalogTxn::new();
                    txn.clear_unresolved(&path);
                    self.commit(&path, txn);
                }
                self.errors.visit(&path);
                continue;
            }

            let dependents = self.live_dependents(&name, &deleting);
            if !dependents.is_empty() {
                if self.aborted {
                    // Dependents were never reached; dropping now would strand them
                    log::debug!("Keeping {name}: strict run stopped before its dependents");
                    continue;
                }
                for dependent in dependents {
                    if let Some(dependent_path) = self.path_of(dependent.as_str()) {
                        let gone = BTreeSet::from([name.to_string()]);
                        self.tear_down(&dependent, &dependent_path, gone).await;
                    }
                }
            }

            if !self.dry() {
                log::debug!("Deleting entry {name}");
                if let Err(e) = handler_for(entry.kind())
                    .drop(self.rc.olap.as_ref(), &entry)
                    .await
                {
                    log::warn!("Failed to drop {} for deleted artifact {}: {}", name, path, e);
                }
                let mut txn = CatalogTxn::new();
                txn.remove(name.clone());
                if self.has_marker(&path) {
                    txn.clear_unresolved(&path);
                }
                self.commit(&path, txn);
            }
            self.errors.visit(&path);
        }
    }
}

async fn run_migration(
    olap: Arc<dyn Database>,
    base_dir: Option<PathBuf>,
    job: MigrationJob,
) -> MigrationOutcome {
    let olap = olap.as_ref();
    let olap_error =
        |path: &str, e: rk_db::DbError| vec![ReconcileError::new(ErrorCode::Olap, path, e.to_string())];

    if let Some(old) = &job.rename_from {
        match olap.rename_relation(old.name.as_str(), job.name.as_str()).await {
            Ok(()) => {
                log::debug!("Renamed {} to {}", old.name, job.name);
                let result = olap
                    .describe(job.name.as_str())
                    .await
                    .map_err(|e| olap_error(&job.path, e));
                return MigrationOutcome {
                    job,
                    renamed: true,
                    result,
                };
            }
            Err(e) => log::warn!(
                "Could not rename {} to {}, rebuilding instead: {}",
                old.name,
                job.name,
                e
            ),
        }
    }

    if let Some(prev) = job.previous.as_ref().filter(|p| p.kind() != job.spec.kind()) {
        log::debug!("{} changed kind from {} to {}", job.name, prev.kind(), job.spec.kind());
        if let Err(e) = handler_for(prev.kind()).drop(olap, prev).await {
            log::warn!("Failed to drop previous {} {}: {}", prev.kind(), prev.name, e);
        }
    }

    let ctx = MigrateContext {
        olap,
        path: &job.path,
        name: &job.name,
        previous: job.previous.as_ref(),
        base_dir: base_dir.as_ref(),
    };
    let result = handler_for(job.spec.kind()).migrate(&ctx, &job.spec).await;
    MigrationOutcome {
        job,
        renamed: false,
        result,
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod tests;
