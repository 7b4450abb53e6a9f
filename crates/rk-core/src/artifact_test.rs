use super::*;

#[test]
fn test_normalize_path() {
    assert_eq!(normalize_path("models/a.sql").unwrap(), "/models/a.sql");
    assert_eq!(normalize_path("/models//a.sql").unwrap(), "/models/a.sql");
    assert_eq!(normalize_path("models\\a.sql").unwrap(), "/models/a.sql");
    assert_eq!(normalize_path("./models/./a.sql").unwrap(), "/models/a.sql");
    assert!(normalize_path("../a.sql").is_err());
    assert!(normalize_path("/").is_err());
}

#[test]
fn test_entry_name_for_path() {
    assert_eq!(entry_name_for_path("/models/orders.sql").unwrap(), "orders");
    assert_eq!(entry_name_for_path("/sources/raw_events.yaml").unwrap(), "raw_events");
    // Only the last extension is stripped, and dots are not valid in names
    assert!(entry_name_for_path("/sources/raw.events.yaml").is_none());
    assert!(entry_name_for_path("/models/bad name.sql").is_none());
}

#[test]
fn test_detect_kind_by_extension_and_field() {
    assert_eq!(detect_kind("/anything/x.sql", ""), Some(EntryKind::Model));
    assert_eq!(
        detect_kind("/x.yaml", "kind: source\nconnector: https\n"),
        Some(EntryKind::Source)
    );
    assert_eq!(
        detect_kind("/x.yml", "kind: metrics_view\nmodel: m\n"),
        Some(EntryKind::MetricsView)
    );
    assert_eq!(detect_kind("/x.yaml", "kind: table\n"), Some(EntryKind::Table));
    assert_eq!(detect_kind("/notes.txt", "kind: source"), None);
}

#[test]
fn test_detect_kind_falls_back_to_directory() {
    assert_eq!(detect_kind("/sources/a.yaml", "path: a.csv"), Some(EntryKind::Source));
    assert_eq!(detect_kind("/dashboards/d.yaml", "model: m"), Some(EntryKind::MetricsView));
    assert_eq!(detect_kind("/metrics/d.yaml", "model: m"), Some(EntryKind::MetricsView));
    assert_eq!(detect_kind("/tables/t.yml", ""), Some(EntryKind::Table));
    // Unparseable YAML still routes by directory
    assert_eq!(detect_kind("/sources/a.yaml", ":::"), Some(EntryKind::Source));
    assert_eq!(detect_kind("/misc/a.yaml", "x: 1"), None);
}

#[test]
fn test_mem_store_crud() {
    let store = MemStore::new();
    store.put("models/a.sql", "SELECT 1", false).unwrap();
    assert_eq!(store.get("/models/a.sql").unwrap().unwrap().blob, "SELECT 1");

    let err = store.put("/models/a.sql", "SELECT 2", true).unwrap_err();
    assert!(matches!(err, CoreError::ArtifactExists { .. }));

    store.rename("/models/a.sql", "/models/b.sql").unwrap();
    assert!(store.get("/models/a.sql").unwrap().is_none());
    assert_eq!(store.get("/models/b.sql").unwrap().unwrap().path, "/models/b.sql");

    store.delete("/models/b.sql").unwrap();
    assert!(matches!(
        store.delete("/models/b.sql"),
        Err(CoreError::ArtifactNotFound { .. })
    ));
}

#[test]
fn test_mem_store_list_artifacts_skips_config() {
    let store = MemStore::with_files([
        ("/rekon.yml", "name: p"),
        ("/models/a.sql", "SELECT 1"),
        ("/models/nested/b.sql", "SELECT 2"),
        ("/sources/s.yaml", "path: s.csv"),
        ("/README.md", "docs"),
    ])
    .unwrap();
    assert_eq!(
        store.list_artifacts().unwrap(),
        vec!["/models/a.sql", "/models/nested/b.sql", "/sources/s.yaml"]
    );
    assert_eq!(store.list("/models/*.sql").unwrap(), vec!["/models/a.sql"]);
}

#[test]
fn test_file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store.put("/models/a.sql", "SELECT 1", true).unwrap();
    store.put("/rekon.yml", "name: p", false).unwrap();
    std::fs::create_dir_all(dir.path().join(".rekon")).unwrap();
    std::fs::write(dir.path().join(".rekon/state.sql"), "x").unwrap();

    assert_eq!(store.list_artifacts().unwrap(), vec!["/models/a.sql"]);
    let artifact = store.get("models/a.sql").unwrap().unwrap();
    assert_eq!(artifact.blob, "SELECT 1");

    assert!(store.put("/models/a.sql", "SELECT 2", true).is_err());
    store.rename("/models/a.sql", "/models/sub/b.sql").unwrap();
    assert!(store.get("/models/a.sql").unwrap().is_none());
    assert!(dir.path().join("models/sub/b.sql").exists());

    store.delete("/models/sub/b.sql").unwrap();
    assert!(store.get("/models/sub/b.sql").unwrap().is_none());
}
