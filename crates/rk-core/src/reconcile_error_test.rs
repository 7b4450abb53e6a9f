use super::*;

#[test]
fn test_code_wire_strings() {
    let json = serde_json::to_string(&ErrorCode::SourcePermissionDenied).unwrap();
    assert_eq!(json, r#""CODE_SOURCE_PERMISSION_DENIED""#);
    let code: ErrorCode = serde_json::from_str(r#""CODE_DEPENDENCY""#).unwrap();
    assert_eq!(code, ErrorCode::Dependency);
    assert_eq!(ErrorCode::default().as_str(), "CODE_UNSPECIFIED");
}

#[test]
fn test_error_serializes_camel_case() {
    let err = ReconcileError::new(ErrorCode::Syntax, "/models/a.sql", "bad sql").at(3, 7);
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["filePath"], "/models/a.sql");
    assert_eq!(json["startLocation"]["line"], 3);
    assert!(json.get("propertyPath").is_none());
}

#[test]
fn test_split_property_path() {
    assert_eq!(
        split_property_path("dimensions[1].column"),
        vec!["dimensions", "1", "column"]
    );
    assert_eq!(split_property_path("model"), vec!["model"]);
    assert!(split_property_path("").is_empty());
}

#[test]
fn test_zero_location_is_ignored() {
    let err = ReconcileError::new(ErrorCode::Syntax, "/a.sql", "x").at(0, 0);
    assert!(err.start_location.is_none());
}

#[test]
fn test_aggregator_dedups_identical_tuples() {
    let mut agg = ErrorAggregator::new();
    let err = ReconcileError::new(ErrorCode::Validation, "/dashboards/d.yaml", "first")
        .with_property_path("measures[0].expression");
    assert!(agg.push(err.clone()));

    let mut repeat = err.clone();
    repeat.message = "second pass".to_string();
    assert!(!agg.push(repeat));

    // Same path and code, different property path: kept
    assert!(agg.push(
        ReconcileError::new(ErrorCode::Validation, "/dashboards/d.yaml", "other")
            .with_property_path("model")
    ));
    assert_eq!(agg.error_count(), 2);
}

#[test]
fn test_aggregator_preserves_discovery_order_and_sorts_affected() {
    let mut agg = ErrorAggregator::new();
    agg.visit("/models/z.sql");
    agg.push(ReconcileError::new(ErrorCode::Olap, "/models/m.sql", "boom"));
    agg.push(ReconcileError::new(ErrorCode::Syntax, "/models/a.sql", "bad"));
    agg.visit("/models/b.sql");

    assert!(agg.has_error_for("/models/m.sql"));
    assert!(!agg.has_error_for("/models/b.sql"));

    let result = agg.finish();
    assert_eq!(result.errors[0].file_path, "/models/m.sql");
    assert_eq!(result.errors[1].file_path, "/models/a.sql");
    assert_eq!(
        result.affected_paths,
        vec!["/models/a.sql", "/models/b.sql", "/models/m.sql", "/models/z.sql"]
    );
    assert!(!result.is_ok());
    assert_eq!(result.errors_for("/models/a.sql").count(), 1);
}

#[test]
fn test_display_includes_location_and_property() {
    let err = ReconcileError::new(ErrorCode::Validation, "/d.yaml", "unknown column")
        .with_property_path("dimensions[0].column")
        .at(4, 5);
    assert_eq!(
        err.to_string(),
        "CODE_VALIDATION /d.yaml:4:5 (dimensions.0.column): unknown column"
    );
}
