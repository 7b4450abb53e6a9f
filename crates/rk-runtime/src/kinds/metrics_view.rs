//! Metrics views: dimensions and measures over a table-like entry
//!
//! A metrics view has no physical object. Migration only proves that every
//! expression can be evaluated against the underlying relation.

use super::{parse_yaml, CompileContext, KindHandler, MigrateContext, Scope};
use async_trait::async_trait;
use rk_core::{
    CatalogEntry, Column, Dimension, EntryKind, EntrySpec, ErrorCode, Measure, MetricsViewSpec,
    ReconcileError, TimeGrain,
};
use rk_db::{quote_relation, Database, DbResult};
use serde::Deserialize;
use std::collections::HashSet;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DimensionFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    column: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MeasureFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "format_preset")]
    format: Option<String>,
    #[serde(default)]
    valid_percent_of_total: bool,
}

/// On-disk shape of a metrics view (dashboard) artifact
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricsViewFile {
    #[serde(default)]
    #[allow(dead_code)]
    kind: Option<String>,
    #[serde(default, alias = "from")]
    model: Option<String>,
    #[serde(default, alias = "timeseries")]
    time_dimension: Option<String>,
    #[serde(default)]
    dimensions: Vec<DimensionFile>,
    #[serde(default)]
    measures: Vec<MeasureFile>,
    #[serde(default, alias = "title")]
    label: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    smallest_time_grain: Option<TimeGrain>,
    #[serde(default)]
    default_time_range: Option<String>,
    #[serde(default)]
    available_time_zones: Vec<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<MetricsViewFile> for MetricsViewSpec {
    fn from(file: MetricsViewFile) -> Self {
        let dimensions = file
            .dimensions
            .into_iter()
            .map(|d| {
                let column = non_empty(d.column);
                Dimension {
                    name: non_empty(d.name)
                        .or_else(|| column.clone())
                        .unwrap_or_default(),
                    label: d.label,
                    description: d.description,
                    column,
                }
            })
            .collect();
        let measures = file
            .measures
            .into_iter()
            .enumerate()
            .map(|(i, m)| Measure {
                name: non_empty(m.name).unwrap_or_else(|| format!("measure_{i}")),
                label: m.label,
                expression: m.expression.unwrap_or_default().trim().to_string(),
                description: m.description,
                format: m.format,
                valid_percent_of_total: m.valid_percent_of_total,
            })
            .collect();

        MetricsViewSpec {
            model: non_empty(file.model).unwrap_or_default(),
            time_dimension: non_empty(file.time_dimension),
            dimensions,
            measures,
            label: file.label,
            description: file.description,
            smallest_time_grain: file.smallest_time_grain,
            default_time_range: non_empty(file.default_time_range),
            available_time_zones: file.available_time_zones,
        }
    }
}

fn has_column(columns: &[Column], name: &str) -> bool {
    columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
}

pub struct MetricsViewHandler;

#[async_trait]
impl KindHandler for MetricsViewHandler {
    fn kind(&self) -> EntryKind {
        EntryKind::MetricsView
    }

    fn compile(&self, ctx: &CompileContext<'_>, blob: &str) -> Result<EntrySpec, Vec<ReconcileError>> {
        let file: MetricsViewFile = parse_yaml(ctx.path, blob).map_err(|e| vec![e])?;
        Ok(EntrySpec::MetricsView(file.into()))
    }

    fn validate(&self, path: &str, spec: &EntrySpec, scope: &Scope) -> Vec<ReconcileError> {
        let EntrySpec::MetricsView(mv) = spec else {
            return Vec::new();
        };
        let mut errors = Vec::new();
        let invalid = |property: &str, msg: String| {
            ReconcileError::new(ErrorCode::Validation, path, msg).with_property_path(property)
        };

        // Parent columns, when the parent is known and has been migrated
        let mut columns: &[Column] = &[];
        if mv.model.is_empty() {
            errors.push(invalid("model", "metrics view must name a model".to_string()));
        } else {
            match scope.get(&mv.model) {
                None => errors.push(
                    ReconcileError::new(
                        ErrorCode::Dependency,
                        path,
                        format!("model '{}' not found", mv.model),
                    )
                    .with_property_path("model"),
                ),
                Some(parent) if !parent.kind.is_table_like() => errors.push(
                    ReconcileError::new(
                        ErrorCode::Dependency,
                        path,
                        format!("'{}' is a {}, not a table-like entry", mv.model, parent.kind.label()),
                    )
                    .with_property_path("model"),
                ),
                Some(parent) => columns = &parent.columns,
            }
        }

        if let Some(time) = &mv.time_dimension {
            if !columns.is_empty() && !has_column(columns, time) {
                errors.push(invalid(
                    "time_dimension",
                    format!("time dimension '{time}' is not a column of '{}'", mv.model),
                ));
            }
        }

        let mut names = HashSet::new();
        for (i, dim) in mv.dimensions.iter().enumerate() {
            if dim.name.is_empty() {
                errors.push(invalid(
                    &format!("dimensions[{i}].name"),
                    "dimension needs a name or a column".to_string(),
                ));
                continue;
            }
            if !names.insert(dim.name.to_ascii_lowercase()) {
                errors.push(invalid(
                    &format!("dimensions[{i}].name"),
                    format!("duplicate name '{}'", dim.name),
                ));
            }
            if !columns.is_empty() && !has_column(columns, dim.column_name()) {
                errors.push(invalid(
                    &format!("dimensions[{i}].column"),
                    format!("column '{}' not found in '{}'", dim.column_name(), mv.model),
                ));
            }
        }

        if mv.measures.is_empty() {
            errors.push(invalid(
                "measures",
                "metrics view must define at least one measure".to_string(),
            ));
        }
        for (i, measure) in mv.measures.iter().enumerate() {
            if !names.insert(measure.name.to_ascii_lowercase()) {
                errors.push(invalid(
                    &format!("measures[{i}].name"),
                    format!("duplicate name '{}'", measure.name),
                ));
            }
            if measure.expression.is_empty() {
                errors.push(invalid(
                    &format!("measures[{i}].expression"),
                    "measure expression is required".to_string(),
                ));
            }
        }

        if let Some(range) = &mv.default_time_range {
            if !range.starts_with('P') {
                errors.push(invalid(
                    "default_time_range",
                    format!("'{range}' is not an ISO 8601 duration"),
                ));
            }
        }
        errors
    }

    async fn migrate(
        &self,
        ctx: &MigrateContext<'_>,
        spec: &EntrySpec,
    ) -> Result<Vec<Column>, Vec<ReconcileError>> {
        let EntrySpec::MetricsView(mv) = spec else {
            return Err(vec![ReconcileError::new(
                ErrorCode::Unspecified,
                ctx.path,
                "metrics view handler received another kind of spec",
            )]);
        };

        let from = quote_relation(&mv.model);
        let mut checks: Vec<(String, String)> = Vec::new();
        for (i, dim) in mv.dimensions.iter().enumerate() {
            checks.push((
                format!("dimensions[{i}].column"),
                quote_relation(dim.column_name()),
            ));
        }
        for (i, measure) in mv.measures.iter().enumerate() {
            checks.push((format!("measures[{i}].expression"), measure.expression.clone()));
        }
        if let Some(time) = &mv.time_dimension {
            checks.push(("time_dimension".to_string(), quote_relation(time)));
        }

        let mut errors = Vec::new();
        for (property, expr) in checks {
            let sql = format!("SELECT {expr} FROM {from} LIMIT 0");
            if let Err(e) = ctx.olap.query_count(&sql).await {
                log::debug!("Expression check failed for {} {}: {}", ctx.name, property, e);
                errors.push(
                    ReconcileError::new(ErrorCode::Olap, ctx.path, e.to_string())
                        .with_property_path(&property),
                );
            }
        }
        if errors.is_empty() {
            Ok(Vec::new())
        } else {
            Err(errors)
        }
    }

    async fn drop(&self, _olap: &dyn Database, _entry: &CatalogEntry) -> DbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "metrics_view_test.rs"]
mod tests;
