use super::*;
use crate::template::TemplateEngine;
use rk_core::EntryName;
use rk_db::DuckDbBackend;
use std::collections::BTreeMap;

fn compile_at(path: &str, blob: &str) -> Result<EntrySpec, Vec<ReconcileError>> {
    let name = EntryName::new("orders_daily");
    let templates = TemplateEngine::new(BTreeMap::from([(
        "min_amount".to_string(),
        "10".to_string(),
    )]));
    let ctx = CompileContext {
        path,
        name: &name,
        templates: &templates,
    };
    ModelHandler.compile(&ctx, blob)
}

fn compile(blob: &str) -> Result<EntrySpec, Vec<ReconcileError>> {
    compile_at("/models/orders_daily.sql", blob)
}

fn model(spec: &EntrySpec) -> &ModelSpec {
    match spec {
        EntrySpec::Model(m) => m,
        other => panic!("expected a model, got {other:?}"),
    }
}

#[test]
fn test_compile_extracts_references() {
    let spec = compile(
        "WITH recent AS (SELECT * FROM orders)\nSELECT r.*, c.name FROM recent r JOIN customers c ON r.cid = c.id;\n",
    )
    .unwrap();
    let m = model(&spec);
    assert_eq!(
        m.references.iter().cloned().collect::<Vec<_>>(),
        vec!["customers".to_string(), "orders".to_string()]
    );
    assert!(!m.sql.ends_with(';'));
    assert!(!m.materialize);
}

#[test]
fn test_compile_renders_vars_and_config() {
    let spec = compile(
        "{{ config(materialize=true) }}\nSELECT * FROM orders WHERE amount > {{ var('min_amount') }}",
    )
    .unwrap();
    let m = model(&spec);
    assert!(m.materialize);
    assert_eq!(m.sql, "SELECT * FROM orders WHERE amount > 10");

    let spec = compile("{{ config(materialized='table') }}SELECT 1 AS x").unwrap();
    assert!(model(&spec).materialize);
}

#[test]
fn test_compile_syntax_error_location_accounts_for_leading_lines() {
    let errs = compile("\n\nSELECT *\nFROM orders WHERE = 1").unwrap_err();
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].code, ErrorCode::Syntax);
    let loc = errs[0].start_location.expect("parse errors carry a location");
    assert_eq!(loc.line, 4);
}

#[test]
fn test_compile_undefined_variable_is_syntax_error() {
    let errs = compile("SELECT {{ var('nope') }}").unwrap_err();
    assert_eq!(errs[0].code, ErrorCode::Syntax);
}

#[test]
fn test_compile_yaml_model() {
    let spec = compile_at(
        "/models/orders_daily.yaml",
        "kind: model\nmaterialize: true\nsql: SELECT id FROM orders\n",
    )
    .unwrap();
    let m = model(&spec);
    assert!(m.materialize);
    assert!(m.references.contains("orders"));
}

#[test]
fn test_validate_rejects_empty_and_non_query_sql() {
    let spec = compile("  ").unwrap();
    let errs = ModelHandler.validate("/models/orders_daily.sql", &spec, &Scope::new());
    assert_eq!(errs[0].code, ErrorCode::Validation);

    let spec = compile("SELECT 1; SELECT 2").unwrap();
    let errs = ModelHandler.validate("/models/orders_daily.sql", &spec, &Scope::new());
    assert_eq!(errs[0].code, ErrorCode::Validation);

    let spec = compile("DELETE FROM orders").unwrap();
    let errs = ModelHandler.validate("/models/orders_daily.sql", &spec, &Scope::new());
    assert_eq!(errs[0].code, ErrorCode::Validation);
}

#[test]
fn test_validate_rejects_selecting_from_metrics_view() {
    let mut scope = Scope::new();
    scope.insert(
        "dash",
        &EntrySpec::MetricsView(rk_core::MetricsViewSpec {
            model: "orders".into(),
            time_dimension: None,
            dimensions: vec![],
            measures: vec![],
            label: None,
            description: None,
            smallest_time_grain: None,
            default_time_range: None,
            available_time_zones: vec![],
        }),
    );
    let spec = compile("SELECT * FROM dash").unwrap();
    let errs = ModelHandler.validate("/models/orders_daily.sql", &spec, &scope);
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0].code, ErrorCode::Dependency);
}

#[tokio::test]
async fn test_migrate_switches_between_view_and_table() {
    let db = DuckDbBackend::in_memory().unwrap();
    db.execute_batch("CREATE TABLE orders (id INTEGER, amount DOUBLE); INSERT INTO orders VALUES (1, 5), (2, 50)")
        .await
        .unwrap();
    let name = EntryName::new("orders_daily");
    let ctx = MigrateContext {
        olap: &db,
        path: "/models/orders_daily.sql",
        name: &name,
        previous: None,
        base_dir: None,
    };

    let view = compile("SELECT id FROM orders WHERE amount > {{ min_amount }}").unwrap();
    let columns = ModelHandler.migrate(&ctx, &view).await.unwrap();
    assert_eq!(columns, vec![Column::new("id", "INTEGER")]);
    assert_eq!(
        db.relation_kind("orders_daily").await.unwrap(),
        Some(RelationKind::View)
    );

    let table = compile("{{ config(materialize=true) }}SELECT id FROM orders").unwrap();
    ModelHandler.migrate(&ctx, &table).await.unwrap();
    assert_eq!(
        db.relation_kind("orders_daily").await.unwrap(),
        Some(RelationKind::Table)
    );
    assert_eq!(db.query_count("SELECT * FROM orders_daily").await.unwrap(), 2);
}

#[tokio::test]
async fn test_migrate_failure_is_olap_error() {
    let db = DuckDbBackend::in_memory().unwrap();
    let name = EntryName::new("orders_daily");
    let ctx = MigrateContext {
        olap: &db,
        path: "/models/orders_daily.sql",
        name: &name,
        previous: None,
        base_dir: None,
    };
    let spec = compile("SELECT * FROM missing_table").unwrap();
    let errs = ModelHandler.migrate(&ctx, &spec).await.unwrap_err();
    assert_eq!(errs[0].code, ErrorCode::Olap);
}
