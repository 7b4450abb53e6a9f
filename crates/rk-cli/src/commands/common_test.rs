use super::*;
use rk_core::{ErrorCode, ReconcileError};

fn global(project_dir: &Path) -> GlobalArgs {
    GlobalArgs {
        verbose: false,
        project_dir: project_dir.display().to_string(),
        config: None,
        vars: vec![],
    }
}

#[test]
fn test_instance_config_from_project() {
    let mut config = ProjectConfig::named("shop");
    config.vars.insert("region".to_string(), "eu".to_string());
    config.threads = 3;
    let root = Path::new("/srv/shop");

    let instance = instance_config(
        root,
        &config,
        &[("region".to_string(), "us".to_string())],
    );
    assert_eq!(instance.id.as_deref(), Some("shop"));
    assert_eq!(instance.olap_dsn, "/srv/shop/.rekon/olap.duckdb");
    assert_eq!(instance.repo_driver, RepoDriver::File);
    assert_eq!(instance.repo_dsn, "/srv/shop");
    assert_eq!(instance.state_dir, Some(PathBuf::from("/srv/shop/.rekon")));
    assert_eq!(instance.threads, 3);
    assert_eq!(instance.vars.get("region").map(String::as_str), Some("us"));
}

#[test]
fn test_embedded_and_in_memory_instance_config() {
    let mut config = ProjectConfig::named("shop");
    config.embed_catalog = true;
    config.olap.dsn = ":memory:".to_string();

    let instance = instance_config(Path::new("/srv/shop"), &config, &[]);
    assert_eq!(instance.olap_dsn, ":memory:");
    assert!(instance.embed_catalog);
    assert!(instance.state_dir.is_none());
}

#[test]
fn test_load_config_from_project_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("rekon.yml"),
        "name: shop\nthreads: 2\nvars:\n  region: eu\n",
    )
    .unwrap();

    let (root, config) = load_config(&global(dir.path())).unwrap();
    assert_eq!(root, std::fs::canonicalize(dir.path()).unwrap());
    assert_eq!(config.name, "shop");
    assert_eq!(config.threads, 2);
}

#[test]
fn test_load_config_missing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_config(&global(dir.path())).is_err());
    assert!(load_config(&global(&dir.path().join("nope"))).is_err());
}

#[test]
fn test_report_exit_code() {
    let ok = ReconcileResult {
        errors: vec![],
        affected_paths: vec!["/models/a.sql".to_string()],
    };
    assert!(report(&ok, OutputFormat::Json, false).is_ok());

    let failed = ReconcileResult {
        errors: vec![ReconcileError::new(
            ErrorCode::Syntax,
            "/models/b.sql",
            "unexpected token",
        )],
        affected_paths: vec!["/models/a.sql".to_string(), "/models/b.sql".to_string()],
    };
    assert_eq!(ok_count(&failed), 1);
    let err = report(&failed, OutputFormat::Text, false).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ExitCode>().map(|c| c.0),
        Some(EXIT_RECONCILE_ERRORS)
    );
}

#[test]
fn test_column_widths() {
    let widths = calculate_column_widths(
        &["NAME", "KIND"],
        &[vec!["orders".to_string(), "source".to_string()]],
    );
    assert_eq!(widths, vec![6, 6]);
}
