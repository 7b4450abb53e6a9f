use super::*;
use crate::catalog::{Catalog, CatalogTxn};
use crate::entry::{CatalogEntry, EntrySpec, ModelDialect, ModelSpec};
use chrono::Utc;

fn refs(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn node(name: &str, deps: &[&str]) -> (EntryName, BTreeSet<String>) {
    (EntryName::new(name), refs(deps))
}

fn names(list: &[&str]) -> Vec<EntryName> {
    list.iter().map(|n| EntryName::new(*n)).collect()
}

#[test]
fn test_topological_order_parents_first() {
    let dag = DependencyGraph::build([
        node("fct_orders", &["stg_orders", "stg_customers"]),
        node("stg_orders", &[]),
        node("stg_customers", &[]),
    ]);
    let order = dag.topological_order();
    let pos = |n: &str| order.iter().position(|m| m == n).unwrap();
    assert!(pos("fct_orders") > pos("stg_orders"));
    assert!(pos("fct_orders") > pos("stg_customers"));
    // ties broken by name
    assert!(pos("stg_customers") < pos("stg_orders"));
}

#[test]
fn test_levels_group_independent_entries() {
    let dag = DependencyGraph::build([
        node("a", &[]),
        node("b", &[]),
        node("c", &["a", "b"]),
        node("d", &["c"]),
    ]);
    assert_eq!(
        dag.levels(),
        vec![names(&["a", "b"]), names(&["c"]), names(&["d"])]
    );
}

#[test]
fn test_unresolved_references_are_not_edges() {
    let dag = DependencyGraph::build([node("m", &["raw_events", "n"]), node("n", &[])]);
    assert_eq!(dag.parents("m"), BTreeSet::from([EntryName::new("n")]));
    assert_eq!(dag.unresolved("m"), Some(&refs(&["raw_events"])));
    assert!(dag.unresolved("n").is_none());
}

#[test]
fn test_cycle_detection_reports_all_members() {
    let dag = DependencyGraph::build([
        node("a", &["b"]),
        node("b", &["a"]),
        node("c", &["a"]),
        node("ok", &[]),
    ]);
    assert_eq!(dag.cycles(), vec![names(&["a", "b"])]);
    assert_eq!(dag.topological_order(), names(&["ok"]));
    assert_eq!(
        dag.blocked(),
        BTreeSet::from([EntryName::new("a"), EntryName::new("b"), EntryName::new("c")])
    );
}

#[test]
fn test_self_reference_is_a_cycle() {
    let dag = DependencyGraph::build([node("a", &["a"])]);
    assert_eq!(dag.cycles(), vec![names(&["a"])]);
    assert!(dag.topological_order().is_empty());
}

#[test]
fn test_ancestors_and_descendants() {
    let dag = DependencyGraph::build([
        node("raw", &[]),
        node("stg", &["raw"]),
        node("int", &["stg"]),
        node("fct", &["int"]),
    ]);
    assert_eq!(
        dag.descendants("stg"),
        BTreeSet::from([EntryName::new("int"), EntryName::new("fct")])
    );
    assert_eq!(
        dag.ancestors("int"),
        BTreeSet::from([EntryName::new("raw"), EntryName::new("stg")])
    );
    assert!(dag.descendants("fct").is_empty());
    assert!(dag.descendants("unknown").is_empty());
}

fn model_entry(name: &str, deps: &[&str]) -> CatalogEntry {
    CatalogEntry::new(
        EntryName::new(name),
        format!("/models/{name}.sql"),
        EntrySpec::Model(ModelSpec {
            sql: "SELECT 1".to_string(),
            dialect: ModelDialect::DuckDb,
            materialize: false,
            references: refs(deps),
            columns: vec![],
        }),
        Utc::now(),
    )
}

fn chain_catalog() -> Catalog {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &[]))
        .upsert(model_entry("b", &["a"]))
        .upsert(model_entry("c", &["b"]))
        .upsert(model_entry("x", &[]));
    catalog.commit(txn).unwrap();
    catalog
}

fn paths(list: &[&str]) -> Vec<String> {
    list.iter().map(|p| p.to_string()).collect()
}

#[test]
fn test_affected_cascades_to_descendants_in_order() {
    let catalog = chain_catalog();
    let affected = compute_affected(&catalog.snapshot(), &paths(&["/models/a.sql"]), &[], &[]);
    assert_eq!(
        affected,
        paths(&["/models/a.sql", "/models/b.sql", "/models/c.sql"])
    );
}

#[test]
fn test_affected_never_includes_ancestors() {
    let catalog = chain_catalog();
    let affected = compute_affected(&catalog.snapshot(), &paths(&["/models/c.sql"]), &[], &[]);
    assert_eq!(affected, paths(&["/models/c.sql"]));
}

#[test]
fn test_affected_keeps_changed_then_forced_order() {
    let catalog = chain_catalog();
    let affected = compute_affected(
        &catalog.snapshot(),
        &paths(&["/models/x.sql", "/models/c.sql"]),
        &paths(&["/models/c.sql", "/models/new.sql"]),
        &[],
    );
    assert_eq!(
        affected,
        paths(&["/models/x.sql", "/models/c.sql", "/models/new.sql"])
    );
}

#[test]
fn test_empty_changed_means_full_rebuild() {
    let catalog = chain_catalog();
    let affected = compute_affected(
        &catalog.snapshot(),
        &[],
        &[],
        &paths(&["/models/new.sql", "/models/a.sql"]),
    );
    assert_eq!(
        affected,
        paths(&[
            "/models/a.sql",
            "/models/b.sql",
            "/models/c.sql",
            "/models/new.sql",
            "/models/x.sql"
        ])
    );
}

#[test]
fn test_affected_pulls_in_waiting_paths() {
    let catalog = chain_catalog();
    let mut txn = CatalogTxn::new();
    txn.mark_unresolved("/dashboards/d.yaml", refs(&["m"]));
    catalog.commit(txn).unwrap();

    let affected = compute_affected(&catalog.snapshot(), &paths(&["/models/m.sql"]), &[], &[]);
    assert_eq!(affected, paths(&["/models/m.sql", "/dashboards/d.yaml"]));
}

#[test]
fn test_affected_follows_chains_of_waiting_paths() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.mark_unresolved("/models/b.sql", refs(&["a"]))
        .mark_unresolved("/dashboards/d.yaml", refs(&["b"]));
    catalog.commit(txn).unwrap();

    let affected = compute_affected(&catalog.snapshot(), &paths(&["/models/a.sql"]), &[], &[]);
    assert_eq!(
        affected,
        paths(&["/models/a.sql", "/models/b.sql", "/dashboards/d.yaml"])
    );
}
