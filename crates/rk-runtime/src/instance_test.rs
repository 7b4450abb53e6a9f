use super::*;
use rk_core::EntryKind;
use tempfile::TempDir;

fn memory_config(id: &str) -> InstanceConfig {
    InstanceConfig::in_memory().with_id(id)
}

fn file_config(dir: &TempDir, embed_catalog: bool) -> InstanceConfig {
    let project = dir.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    InstanceConfig {
        id: Some("local".to_string()),
        olap_dsn: dir.path().join("db/rekon.duckdb").display().to_string(),
        repo_driver: RepoDriver::File,
        repo_dsn: project.display().to_string(),
        embed_catalog,
        state_dir: (!embed_catalog).then(|| dir.path().join("state")),
        ..InstanceConfig::in_memory()
    }
}

#[test]
fn test_config_validation() {
    let mut config = InstanceConfig::in_memory();
    config.olap_dsn = " ".to_string();
    assert!(matches!(
        config.validate(),
        Err(RuntimeError::InvalidInstance { .. })
    ));

    let mut config = InstanceConfig::in_memory();
    config.repo_driver = RepoDriver::File;
    assert!(config.validate().is_err());

    let mut config = InstanceConfig::in_memory();
    config.threads = 0;
    assert!(config.validate().is_err());

    assert!(InstanceConfig::in_memory().validate().is_ok());
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: InstanceConfig = serde_json::from_str(r#"{"olap_dsn": ":memory:"}"#).unwrap();
    assert_eq!(config.threads, 1);
    assert_eq!(config.repo_driver, RepoDriver::File);
    assert!(!config.embed_catalog);
}

#[tokio::test]
async fn test_registry_lifecycle() {
    let registry = InstanceRegistry::new();
    let a = registry.create(memory_config("a")).await.unwrap();
    registry.create(memory_config("b")).await.unwrap();
    assert_eq!(a.id(), "a");
    assert!(registry.contains("b"));
    assert_eq!(
        registry.list().iter().map(|i| i.id().to_string()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );

    assert!(matches!(
        registry.create(memory_config("a")).await,
        Err(RuntimeError::InstanceExists { .. })
    ));

    registry.delete("a", false).await.unwrap();
    assert!(matches!(
        registry.get("a"),
        Err(RuntimeError::InstanceNotFound { .. })
    ));
    assert!(registry.delete("a", false).await.is_err());
}

#[tokio::test]
async fn test_generated_id() {
    let registry = InstanceRegistry::new();
    let instance = registry.create(InstanceConfig::in_memory()).await.unwrap();
    assert!(uuid::Uuid::parse_str(instance.id()).is_ok());
}

#[tokio::test]
async fn test_put_requires_existing_file_unless_create() {
    let instance = Instance::open(memory_config("i")).await.unwrap();
    let err = instance
        .put_file_and_reconcile("/models/a.sql", "SELECT 1 AS id", false, false, false, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(CoreError::ArtifactNotFound { .. })
    ));

    let result = instance
        .put_file_and_reconcile("models/a.sql", "SELECT 1 AS id", true, true, false, false)
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(result.affected_paths, vec!["/models/a.sql"]);
    assert!(instance.snapshot().get("a").is_some());

    let err = instance
        .put_file_and_reconcile("/models/a.sql", "SELECT 2 AS id", true, true, false, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(CoreError::ArtifactExists { .. })
    ));
}

#[tokio::test]
async fn test_delete_and_rename_files() {
    let instance = Instance::open(memory_config("i")).await.unwrap();
    instance
        .put_file_and_reconcile("/models/a.sql", "SELECT 1 AS id", true, false, false, false)
        .await
        .unwrap();

    let result = instance
        .rename_file_and_reconcile("/models/a.sql", "/models/b.sql", false, false)
        .await
        .unwrap();
    assert!(result.is_ok(), "{:?}", result.errors);
    let snap = instance.snapshot();
    assert!(snap.get("a").is_none());
    assert_eq!(snap.get("b").unwrap().path.as_deref(), Some("/models/b.sql"));
    assert!(instance.olap().relation_exists("b").await.unwrap());

    let result = instance
        .delete_file_and_reconcile("/models/b.sql", false, false)
        .await
        .unwrap();
    assert!(result.is_ok());
    assert!(instance.snapshot().is_empty());
    assert!(!instance.olap().relation_exists("b").await.unwrap());
}

#[tokio::test]
async fn test_dry_put_leaves_catalog_alone() {
    let instance = Instance::open(memory_config("i")).await.unwrap();
    let result = instance
        .put_file_and_reconcile("/models/a.sql", "SELECT 1 AS id", true, false, true, false)
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(instance.snapshot().generation(), 0);
    assert!(!instance.olap().relation_exists("a").await.unwrap());
    // The artifact itself was written
    assert!(instance.repo().get("/models/a.sql").unwrap().is_some());
}

#[tokio::test]
async fn test_variables_apply_to_next_run() {
    let registry = InstanceRegistry::new();
    let mut config = memory_config("vars");
    config.vars = BTreeMap::from([("region".to_string(), "eu".to_string())]);
    let instance = registry.create(config).await.unwrap();
    instance
        .put_file_and_reconcile(
            "/models/regional.sql",
            "SELECT '{{ var('region') }}' AS region",
            true,
            false,
            false,
            false,
        )
        .await
        .unwrap();
    let query = "SELECT region FROM regional";
    assert_eq!(instance.olap().query_strings(query).await.unwrap(), vec!["eu"]);

    registry
        .edit_variables("vars", BTreeMap::from([("region".to_string(), "us".to_string())]))
        .unwrap();
    let result = instance
        .refresh_and_reconcile("/models/regional.sql", false, false)
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(instance.olap().query_strings(query).await.unwrap(), vec!["us"]);
}

#[tokio::test]
async fn test_refresh_rebuilds_unchanged_table() {
    let instance = Instance::open(memory_config("i")).await.unwrap();
    instance
        .put_file_and_reconcile(
            "/models/t.sql",
            "{{ config(materialize=true) }}SELECT 1 AS id",
            true,
            false,
            false,
            false,
        )
        .await
        .unwrap();
    instance.olap().execute("INSERT INTO t VALUES (2)").await.unwrap();

    // A plain run skips the unchanged entry
    instance
        .reconcile(ReconcileOptions::changed(["/models/t.sql"]))
        .await
        .unwrap();
    assert_eq!(instance.olap().query_count("SELECT * FROM t").await.unwrap(), 2);

    instance
        .refresh_and_reconcile("/models/t.sql", false, false)
        .await
        .unwrap();
    assert_eq!(instance.olap().query_count("SELECT * FROM t").await.unwrap(), 1);
}

#[tokio::test]
async fn test_sync_olap_tables() {
    let instance = Instance::open(memory_config("i")).await.unwrap();
    instance
        .olap()
        .execute_batch("CREATE TABLE raw_events (id INTEGER, payload VARCHAR); CREATE VIEW v AS SELECT 1")
        .await
        .unwrap();

    assert_eq!(instance.sync_olap_tables().await.unwrap(), 1);
    let snap = instance.snapshot();
    let entry = snap.get("raw_events").unwrap();
    assert!(entry.embedded);
    assert_eq!(entry.kind(), EntryKind::Table);
    assert_eq!(entry.spec.columns().len(), 2);
    assert!(snap.get("v").is_none());

    assert_eq!(instance.sync_olap_tables().await.unwrap(), 0);

    instance.olap().drop_if_exists("raw_events").await.unwrap();
    assert_eq!(instance.sync_olap_tables().await.unwrap(), 1);
    assert!(instance.snapshot().get("raw_events").is_none());
}

async fn put_and_close(config: InstanceConfig) -> u64 {
    let instance = Instance::open(config).await.unwrap();
    let result = instance
        .put_file_and_reconcile("/models/a.sql", "SELECT 1 AS id", true, false, false, false)
        .await
        .unwrap();
    assert!(result.is_ok(), "{:?}", result.errors);
    instance.snapshot().generation()
}

#[tokio::test]
async fn test_catalog_survives_reopen_with_state_dir() {
    let dir = TempDir::new().unwrap();
    let generation = put_and_close(file_config(&dir, false)).await;
    assert!(dir.path().join("state/catalog.json").exists());
    assert!(dir.path().join("project/models/a.sql").exists());

    let reopened = Instance::open(file_config(&dir, false)).await.unwrap();
    assert_eq!(reopened.snapshot().generation(), generation);
    assert!(reopened.snapshot().get("a").is_some());

    // Nothing changed, so nothing is rebuilt
    let result = reopened.reconcile(ReconcileOptions::full()).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(reopened.snapshot().generation(), generation);
}

#[tokio::test]
async fn test_catalog_survives_reopen_when_embedded() {
    let dir = TempDir::new().unwrap();
    let generation = put_and_close(file_config(&dir, true)).await;
    assert!(!dir.path().join("state").exists());

    let reopened = Instance::open(file_config(&dir, true)).await.unwrap();
    assert_eq!(reopened.snapshot().generation(), generation);
    // The catalog table is not mistaken for a user table
    assert_eq!(reopened.sync_olap_tables().await.unwrap(), 0);
}

#[tokio::test]
async fn test_edit_carries_catalog_for_same_olap() {
    let dir = TempDir::new().unwrap();
    let registry = InstanceRegistry::new();
    let original = registry.create(file_config(&dir, false)).await.unwrap();
    original
        .put_file_and_reconcile("/models/a.sql", "SELECT 1 AS id", true, false, false, false)
        .await
        .unwrap();

    let mut config = file_config(&dir, false);
    config.threads = 4;
    let edited = registry.edit("local", config).await.unwrap();
    assert_eq!(edited.created_on(), original.created_on());
    assert_eq!(edited.config().threads, 4);
    assert!(edited.snapshot().get("a").is_some());
    assert!(Arc::ptr_eq(edited.olap(), original.olap()));
    assert!(Arc::ptr_eq(&registry.get("local").unwrap(), &edited));

    let edited = registry
        .edit("local", memory_config("ignored"))
        .await
        .unwrap();
    assert_eq!(edited.id(), "local");
    assert!(edited.snapshot().is_empty());
}

#[tokio::test]
async fn test_replaced_instance_rejects_runs() {
    let dir = TempDir::new().unwrap();
    let registry = InstanceRegistry::new();
    let stale = registry.create(file_config(&dir, false)).await.unwrap();
    stale
        .put_file_and_reconcile("/models/a.sql", "SELECT 1 AS id", true, false, false, false)
        .await
        .unwrap();

    let edited = registry.edit("local", file_config(&dir, false)).await.unwrap();
    assert!(stale.is_retired());
    assert!(!edited.is_retired());

    let err = stale
        .put_file_and_reconcile("/models/b.sql", "SELECT 2 AS id", true, false, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InstanceRetired { .. }));
    assert!(matches!(
        stale.reconcile(ReconcileOptions::full()).await,
        Err(RuntimeError::InstanceRetired { .. })
    ));
    assert!(matches!(
        stale.sync_olap_tables().await,
        Err(RuntimeError::InstanceRetired { .. })
    ));
    // Rejected before touching the shared repo
    assert!(edited.repo().get("/models/b.sql").unwrap().is_none());
    assert!(edited.snapshot().get("b").is_none());

    edited
        .put_file_and_reconcile("/models/b.sql", "SELECT 2 AS id", true, false, false, false)
        .await
        .unwrap();
    assert!(edited.snapshot().get("b").is_some());
}

#[tokio::test]
async fn test_deleted_instance_rejects_runs() {
    let registry = InstanceRegistry::new();
    let instance = registry.create(memory_config("gone")).await.unwrap();
    registry.delete("gone", false).await.unwrap();
    assert!(matches!(
        instance.reconcile(ReconcileOptions::full()).await,
        Err(RuntimeError::InstanceRetired { .. })
    ));
}

#[tokio::test]
async fn test_delete_with_drop_olap_removes_files() {
    let dir = TempDir::new().unwrap();
    let registry = InstanceRegistry::new();
    let instance = registry.create(file_config(&dir, false)).await.unwrap();
    instance
        .put_file_and_reconcile("/models/a.sql", "SELECT 1 AS id", true, false, false, false)
        .await
        .unwrap();
    drop(instance);

    registry.delete("local", true).await.unwrap();
    assert!(!dir.path().join("db/rekon.duckdb").exists());
    assert!(!dir.path().join("state/catalog.json").exists());
    // Artifacts belong to the user and are kept
    assert!(dir.path().join("project/models/a.sql").exists());
}
