use super::*;
use crate::entry::{EntrySpec, ModelSpec, ModelDialect, TableSpec};
use chrono::Utc;

fn model_entry(name: &str, refs: &[&str]) -> CatalogEntry {
    CatalogEntry::new(
        EntryName::new(name),
        format!("/models/{name}.sql"),
        EntrySpec::Model(ModelSpec {
            sql: format!("SELECT * FROM {}", refs.first().unwrap_or(&"range(1)")),
            dialect: ModelDialect::DuckDb,
            materialize: false,
            references: refs.iter().map(|r| r.to_string()).collect(),
            columns: vec![],
        }),
        Utc::now(),
    )
}

#[test]
fn test_commit_links_parents_and_children() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &[]))
        .upsert(model_entry("b", &["a"]))
        .upsert(model_entry("c", &["b", "external_table"]));
    let generation = catalog.commit(txn).unwrap();
    assert_eq!(generation, 1);

    let snap = catalog.snapshot();
    let a = snap.get("a").unwrap();
    assert!(a.parents.is_empty());
    assert_eq!(a.children, BTreeSet::from([EntryName::new("b")]));
    let c = snap.get("c").unwrap();
    assert_eq!(c.parents, BTreeSet::from([EntryName::new("b")]));
    assert_eq!(snap.get_by_path("/models/c.sql").unwrap().name, "c");
}

#[test]
fn test_removal_prunes_edges() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &[])).upsert(model_entry("b", &["a"]));
    catalog.commit(txn).unwrap();

    let mut txn = CatalogTxn::new();
    txn.remove(EntryName::new("a"));
    catalog.commit(txn).unwrap();

    let snap = catalog.snapshot();
    assert!(snap.get("a").is_none());
    assert!(snap.get("b").unwrap().parents.is_empty());
    assert!(snap.get_by_path("/models/a.sql").is_none());
}

#[test]
fn test_cycle_is_rejected_and_generation_unchanged() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &["b"])).upsert(model_entry("b", &["a"]));
    let err = catalog.commit(txn).unwrap_err();
    assert!(matches!(err, CoreError::CircularDependency { .. }));
    assert_eq!(catalog.snapshot().generation(), 0);
    assert!(catalog.snapshot().is_empty());
}

#[test]
fn test_duplicate_path_is_rejected() {
    let catalog = Catalog::new();
    let mut other = model_entry("other", &[]);
    other.path = Some("/models/a.sql".to_string());
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &[])).upsert(other);
    assert!(matches!(
        catalog.commit(txn),
        Err(CoreError::DuplicateEntry { .. })
    ));
}

#[test]
fn test_snapshot_is_isolated_from_later_commits() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &[]));
    catalog.commit(txn).unwrap();

    let before = catalog.snapshot();

    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("b", &["a"]));
    catalog.commit(txn).unwrap();

    assert_eq!(before.len(), 1);
    assert!(before.get("a").unwrap().children.is_empty());
    assert_eq!(catalog.snapshot().len(), 2);
}

#[test]
fn test_unresolved_tracking() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.mark_unresolved("/dashboards/d.yaml", BTreeSet::from(["missing".to_string()]));
    catalog.commit(txn).unwrap();
    assert_eq!(
        catalog.snapshot().unresolved_paths().collect::<Vec<_>>(),
        vec!["/dashboards/d.yaml"]
    );
    assert!(catalog
        .snapshot()
        .unresolved_for("/dashboards/d.yaml")
        .is_some_and(|names| names.contains("missing")));

    let mut txn = CatalogTxn::new();
    txn.clear_unresolved("/dashboards/d.yaml");
    catalog.commit(txn).unwrap();
    assert_eq!(catalog.snapshot().unresolved_paths().count(), 0);
}

#[test]
fn test_from_snapshot_round_trip() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &[]))
        .upsert(model_entry("b", &["a"]))
        .upsert(CatalogEntry::embedded(
            EntryName::new("raw"),
            EntrySpec::Table(TableSpec {
                managed: false,
                columns: vec![],
            }),
            Utc::now(),
        ));
    catalog.commit(txn).unwrap();

    let json = serde_json::to_string(catalog.snapshot().as_ref()).unwrap();
    let restored: CatalogSnapshot = serde_json::from_str(&json).unwrap();
    let restored = Catalog::from_snapshot(restored).unwrap();
    let snap = restored.snapshot();
    assert_eq!(snap.len(), 3);
    assert_eq!(snap.get_by_path("/models/b.sql").unwrap().name, "b");
    assert_eq!(snap.entries_of_kind(EntryKind::Table).count(), 1);
}

#[test]
fn test_clear_bumps_generation() {
    let catalog = Catalog::new();
    let mut txn = CatalogTxn::new();
    txn.upsert(model_entry("a", &[]));
    catalog.commit(txn).unwrap();
    catalog.clear();
    assert!(catalog.snapshot().is_empty());
    assert_eq!(catalog.snapshot().generation(), 2);
}
