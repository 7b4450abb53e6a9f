use super::*;

fn model(sql: &str, refs: &[&str]) -> EntrySpec {
    EntrySpec::Model(ModelSpec {
        sql: sql.to_string(),
        dialect: ModelDialect::DuckDb,
        materialize: false,
        references: refs.iter().map(|r| r.to_string()).collect(),
        columns: Vec::new(),
    })
}

#[test]
fn test_kind_dispatch() {
    assert_eq!(model("SELECT 1", &[]).kind(), EntryKind::Model);
    let table = EntrySpec::Table(TableSpec {
        managed: false,
        columns: vec![],
    });
    assert_eq!(table.kind(), EntryKind::Table);
    assert!(EntryKind::Source.is_table_like());
    assert!(!EntryKind::MetricsView.is_table_like());
}

#[test]
fn test_model_references_strip_schema() {
    let spec = model("SELECT * FROM main.orders JOIN customers USING (id)", &["main.orders", "customers"]);
    let refs = spec.references();
    assert_eq!(
        refs,
        BTreeSet::from(["orders".to_string(), "customers".to_string()])
    );
}

#[test]
fn test_metrics_view_references_model() {
    let spec = EntrySpec::MetricsView(MetricsViewSpec {
        model: "fct_orders".to_string(),
        time_dimension: None,
        dimensions: vec![],
        measures: vec![],
        label: None,
        description: None,
        smallest_time_grain: None,
        default_time_range: None,
        available_time_zones: vec![],
    });
    assert_eq!(spec.references(), BTreeSet::from(["fct_orders".to_string()]));
}

#[test]
fn test_checksum_ignores_columns() {
    let mut a = model("SELECT 1 AS x", &[]);
    let before = a.checksum();
    a.set_columns(vec![Column::new("x", "INTEGER")]);
    assert_eq!(a.checksum(), before);
    assert_eq!(a.columns().len(), 1);

    let b = model("SELECT 2 AS x", &[]);
    assert_ne!(b.checksum(), before);
}

#[test]
fn test_spec_serde_is_tagged() {
    let spec = model("SELECT 1", &[]);
    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["kind"], "model");
    let back: EntrySpec = serde_json::from_value(json).unwrap();
    assert_eq!(back, spec);
}

#[test]
fn test_source_format_inference() {
    assert_eq!(SourceFormat::infer("data/orders.csv"), Some(SourceFormat::Csv));
    assert_eq!(
        SourceFormat::infer("https://x.io/a.parquet?token=1"),
        Some(SourceFormat::Parquet)
    );
    assert_eq!(SourceFormat::infer("s3://b/events.ndjson"), Some(SourceFormat::Json));
    assert_eq!(SourceFormat::infer("s3://b/events"), None);
}

#[test]
fn test_dimension_column_defaults_to_name() {
    let dim = Dimension {
        name: "country".to_string(),
        label: None,
        description: None,
        column: None,
    };
    assert_eq!(dim.column_name(), "country");
}

#[test]
fn test_embedded_entry_has_no_path() {
    let entry = CatalogEntry::embedded(
        EntryName::new("raw_events"),
        EntrySpec::Table(TableSpec {
            managed: false,
            columns: vec![],
        }),
        Utc::now(),
    );
    assert!(entry.embedded);
    assert!(entry.path.is_none());
    assert_eq!(entry.kind(), EntryKind::Table);
}
