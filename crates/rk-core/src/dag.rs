//! Dependency graph over catalog entries
//!
//! The graph is a derived view: it is rebuilt from entry specs whenever it is
//! needed and never mutated in place across runs. Edges point from parent to
//! child so that a topological sort yields dependencies first.

use crate::artifact::entry_name_for_path;
use crate::catalog::CatalogSnapshot;
use crate::entry_name::EntryName;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A directed graph of entry dependencies
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<EntryName, ()>,
    node_map: HashMap<EntryName, NodeIndex>,

    /// References that did not resolve to any node, per entry
    unresolved: BTreeMap<EntryName, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from `(name, references)` pairs.
    ///
    /// A reference becomes an edge only when it names another node; the rest
    /// are kept as unresolved so callers can decide whether they are external
    /// relations or missing dependencies.
    pub fn build<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (EntryName, BTreeSet<String>)>,
    {
        let nodes: Vec<(EntryName, BTreeSet<String>)> = nodes.into_iter().collect();
        let mut dag = Self::new();

        for (name, _) in &nodes {
            dag.add_entry(name);
        }

        for (name, refs) in &nodes {
            for reference in refs {
                match dag.node_map.get(reference.as_str()) {
                    Some(_) => {
                        let parent = EntryName::new(reference.as_str());
                        dag.add_dependency(name, &parent);
                    }
                    None => {
                        dag.unresolved
                            .entry(name.clone())
                            .or_default()
                            .insert(reference.clone());
                    }
                }
            }
        }

        dag
    }

    /// Add an entry, returning its node index
    pub fn add_entry(&mut self, name: &EntryName) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(name) {
            idx
        } else {
            let idx = self.graph.add_node(name.clone());
            self.node_map.insert(name.clone(), idx);
            idx
        }
    }

    /// Record that `child` depends on `parent`
    pub fn add_dependency(&mut self, child: &EntryName, parent: &EntryName) {
        let child_idx = self.add_entry(child);
        let parent_idx = self.add_entry(parent);
        if !self.graph.contains_edge(parent_idx, child_idx) {
            self.graph.add_edge(parent_idx, child_idx, ());
        }
    }

    /// Strongly connected components that form cycles, including self-loops.
    ///
    /// Members of each cycle are sorted and the cycles are sorted by their
    /// first member so results are deterministic.
    pub fn cycles(&self) -> Vec<Vec<EntryName>> {
        let mut cycles: Vec<Vec<EntryName>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&idx| self.graph.contains_edge(idx, idx))
            })
            .map(|component| {
                let mut names: Vec<EntryName> =
                    component.into_iter().map(|idx| self.graph[idx].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Entries in dependency order (parents first), ties broken by name.
    ///
    /// Entries on a cycle, and everything downstream of one, never become
    /// ready and are left out; see [`blocked`](Self::blocked).
    pub fn topological_order(&self) -> Vec<EntryName> {
        self.levels().into_iter().flatten().collect()
    }

    /// Entries grouped into waves: every entry in a wave depends only on
    /// entries from earlier waves, so a wave can be processed concurrently.
    pub fn levels(&self) -> Vec<Vec<EntryName>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                let parents = self
                    .graph
                    .edges_directed(idx, Direction::Incoming)
                    .count();
                (idx, parents)
            })
            .collect();

        let mut ready: BTreeMap<EntryName, NodeIndex> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| (self.graph[idx].clone(), idx))
            .collect();

        let mut levels = Vec::new();
        while !ready.is_empty() {
            let wave = std::mem::take(&mut ready);
            for &idx in wave.values() {
                for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                    let child = edge.target();
                    if let Some(deg) = in_degree.get_mut(&child) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.insert(self.graph[child].clone(), child);
                        }
                    }
                }
            }
            levels.push(wave.into_keys().collect());
        }

        levels
    }

    /// Entries excluded from [`topological_order`](Self::topological_order)
    /// because they sit on or below a cycle.
    pub fn blocked(&self) -> BTreeSet<EntryName> {
        let ordered: HashSet<EntryName> = self.topological_order().into_iter().collect();
        self.node_map
            .keys()
            .filter(|name| !ordered.contains(*name))
            .cloned()
            .collect()
    }

    /// Direct dependencies of an entry
    pub fn parents(&self, name: &str) -> BTreeSet<EntryName> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of an entry
    pub fn children(&self, name: &str) -> BTreeSet<EntryName> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// All transitive dependencies of an entry
    pub fn ancestors(&self, name: &str) -> BTreeSet<EntryName> {
        self.collect_reachable(name, Direction::Incoming)
    }

    /// All transitive dependents of an entry
    pub fn descendants(&self, name: &str) -> BTreeSet<EntryName> {
        self.collect_reachable(name, Direction::Outgoing)
    }

    /// References of `name` that did not resolve to an entry
    pub fn unresolved(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.unresolved.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    fn neighbors(&self, name: &str, direction: Direction) -> BTreeSet<EntryName> {
        let Some(&idx) = self.node_map.get(name) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Iterative DFS from `name`, excluding the start node unless it is
    /// reachable from itself.
    fn collect_reachable(&self, name: &str, direction: Direction) -> BTreeSet<EntryName> {
        let Some(&start) = self.node_map.get(name) else {
            return BTreeSet::new();
        };
        let mut result = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for neighbor in self.graph.neighbors_directed(idx, direction) {
                if visited.insert(neighbor) {
                    result.insert(self.graph[neighbor].clone());
                    stack.push(neighbor);
                }
            }
        }
        result
    }
}

/// Compute the ordered set of artifact paths a run must consider.
///
/// Starts from `changed` then `forced` (deduplicated, in the given order),
/// and appends the paths of every transitive descendant of the entries
/// those paths own, in topological order. Paths that previously failed on a
/// reference to one of those entries are pulled in as well. Ancestors are
/// never added.
///
/// An empty `changed` list means a full rebuild: every path in
/// `known_paths`, every artifact-backed catalog entry and every forced path,
/// sorted.
pub fn compute_affected(
    catalog: &CatalogSnapshot,
    changed: &[String],
    forced: &[String],
    known_paths: &[String],
) -> Vec<String> {
    if changed.is_empty() {
        let mut all: BTreeSet<String> = known_paths.iter().cloned().collect();
        all.extend(catalog.paths().map(str::to_string));
        all.extend(catalog.unresolved_paths().map(str::to_string));
        all.extend(forced.iter().cloned());
        return all.into_iter().collect();
    }

    let mut ordered: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for path in changed.iter().chain(forced) {
        if seen.insert(path.clone()) {
            ordered.push(path.clone());
        }
    }

    // Names owned by the starting paths: the committed owner, and the name
    // the artifact would produce now (they differ after a rename).
    let mut roots: BTreeSet<String> = BTreeSet::new();
    for path in &ordered {
        if let Some(entry) = catalog.get_by_path(path) {
            roots.insert(entry.name.to_string());
        }
        if let Some(name) = entry_name_for_path(path) {
            roots.insert(name.into_inner());
        }
    }

    // Previously failed artifacts waiting on one of those names, and
    // transitively on the names those artifacts would define
    loop {
        let waiting: Vec<String> = catalog
            .unresolved_entries()
            .filter(|(path, names)| {
                !seen.contains(*path) && names.iter().any(|n| roots.contains(n))
            })
            .map(|(path, _)| path.clone())
            .collect();
        if waiting.is_empty() {
            break;
        }
        for path in waiting {
            if let Some(name) = entry_name_for_path(&path) {
                roots.insert(name.into_inner());
            }
            seen.insert(path.clone());
            ordered.push(path);
        }
    }

    let graph = catalog.graph();
    let mut descendants: BTreeSet<EntryName> = BTreeSet::new();
    for root in &roots {
        descendants.extend(graph.descendants(root));
    }

    for name in graph.topological_order() {
        if !descendants.contains(&name) {
            continue;
        }
        let Some(path) = catalog.get(&name).and_then(|e| e.path.clone()) else {
            continue;
        };
        if seen.insert(path.clone()) {
            ordered.push(path);
        }
    }

    ordered
}

#[cfg(test)]
#[path = "dag_test.rs"]
mod tests;
