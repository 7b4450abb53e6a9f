//! Models: SQL transformations materialized as views or tables

use super::{
    ensure_relation_kind, parse_yaml, template_error, CompileContext, KindHandler,
    MigrateContext, Scope,
};
use crate::template::Rendered;
use async_trait::async_trait;
use rk_core::{
    CatalogEntry, Column, EntryKind, EntrySpec, ErrorCode, ModelDialect, ModelSpec,
    ReconcileError,
};
use rk_db::{Database, DbResult, RelationKind};
use rk_sql::{extract_references, SqlError, SqlParser};
use serde::Deserialize;

/// YAML form of a model, for models that carry options next to the SQL
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    #[serde(default)]
    #[allow(dead_code)]
    kind: Option<String>,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    materialize: Option<bool>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

/// `config(materialize=true)` or `config(materialized='table')`
fn materialize_from_config(rendered: &Rendered) -> Option<bool> {
    if let Some(flag) = rendered.config_bool("materialize") {
        return Some(flag);
    }
    rendered
        .config_str("materialized")
        .map(|m| m.eq_ignore_ascii_case("table"))
}

/// Strip surrounding whitespace and trailing semicolons, returning the
/// cleaned SQL and how many lines were removed from the front.
fn clean_sql(rendered: &str) -> (String, usize) {
    let leading = rendered.len() - rendered.trim_start().len();
    let line_offset = rendered[..leading].matches('\n').count();
    let sql = rendered.trim().trim_end_matches(';').trim_end().to_string();
    (sql, line_offset)
}

fn sql_error(path: &str, err: &SqlError, line_offset: usize, property: Option<&str>) -> ReconcileError {
    let code = match err {
        SqlError::ParseError { .. } => ErrorCode::Syntax,
        _ => ErrorCode::Validation,
    };
    let mut out = ReconcileError::new(code, path, err.to_string());
    if let Some((line, column)) = err.location() {
        out = out.at((line + line_offset) as u32, column as u32);
    }
    if let Some(property) = property {
        out = out.with_property_path(property);
    }
    out
}

pub struct ModelHandler;

#[async_trait]
impl KindHandler for ModelHandler {
    fn kind(&self) -> EntryKind {
        EntryKind::Model
    }

    fn compile(&self, ctx: &CompileContext<'_>, blob: &str) -> Result<EntrySpec, Vec<ReconcileError>> {
        let is_sql = ctx.path.to_ascii_lowercase().ends_with(".sql");
        let (template, declared_materialize, property) = if is_sql {
            (blob.to_string(), None, None)
        } else {
            let file: ModelFile = parse_yaml(ctx.path, blob).map_err(|e| vec![e])?;
            (file.sql.unwrap_or_default(), file.materialize, Some("sql"))
        };

        let rendered = ctx
            .templates
            .render(&template)
            .map_err(|e| vec![template_error(ctx.path, e, 1, property)])?;
        let materialize = materialize_from_config(&rendered)
            .or(declared_materialize)
            .unwrap_or(false);

        let (sql, line_offset) = clean_sql(&rendered.text);
        let references = if sql.is_empty() {
            Default::default()
        } else {
            let statements = SqlParser::duckdb()
                .parse(&sql)
                .map_err(|e| vec![sql_error(ctx.path, &e, line_offset, property)])?;
            extract_references(&statements)
        };

        log::debug!(
            "Compiled model {} ({} references, materialize={})",
            ctx.name,
            references.len(),
            materialize
        );
        Ok(EntrySpec::Model(ModelSpec {
            sql,
            dialect: ModelDialect::DuckDb,
            materialize,
            references,
            columns: Vec::new(),
        }))
    }

    fn validate(&self, path: &str, spec: &EntrySpec, scope: &Scope) -> Vec<ReconcileError> {
        let EntrySpec::Model(model) = spec else {
            return Vec::new();
        };
        if model.sql.is_empty() {
            return vec![ReconcileError::new(
                ErrorCode::Validation,
                path,
                "model SQL is empty",
            )];
        }

        let mut errors = Vec::new();
        if let Err(e) = SqlParser::duckdb().parse_model(&model.sql) {
            errors.push(sql_error(path, &e, 0, None));
        }
        for reference in spec.references() {
            if let Some(parent) = scope.get(&reference) {
                if !parent.kind.is_table_like() {
                    errors.push(ReconcileError::new(
                        ErrorCode::Dependency,
                        path,
                        format!("'{reference}' is a {} and cannot be selected from", parent.kind.label()),
                    ));
                }
            }
        }
        errors
    }

    async fn migrate(
        &self,
        ctx: &MigrateContext<'_>,
        spec: &EntrySpec,
    ) -> Result<Vec<Column>, Vec<ReconcileError>> {
        let olap_error = |msg: String| vec![ReconcileError::new(ErrorCode::Olap, ctx.path, msg)];
        let EntrySpec::Model(model) = spec else {
            return Err(olap_error("model handler received a non-model spec".to_string()));
        };

        let name = ctx.name.as_str();
        let wanted = if model.materialize {
            RelationKind::Table
        } else {
            RelationKind::View
        };
        ensure_relation_kind(ctx.olap, name, wanted)
            .await
            .map_err(|e| olap_error(e.to_string()))?;

        log::debug!("Creating {} {}", wanted.keyword().to_lowercase(), name);
        let created = match wanted {
            RelationKind::Table => ctx.olap.create_table_as(name, &model.sql, true).await,
            RelationKind::View => ctx.olap.create_view_as(name, &model.sql, true).await,
        };
        created.map_err(|e| olap_error(e.to_string()))?;

        ctx.olap
            .describe(name)
            .await
            .map_err(|e| olap_error(e.to_string()))
    }

    async fn drop(&self, olap: &dyn Database, entry: &CatalogEntry) -> DbResult<()> {
        olap.drop_if_exists(entry.name.as_str()).await
    }

    fn supports_rename(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
