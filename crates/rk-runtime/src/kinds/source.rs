//! Sources: data ingested from files or object storage into a table

use super::{
    ensure_relation_kind, parse_yaml, template_error, CompileContext, KindHandler,
    MigrateContext, Scope,
};
use async_trait::async_trait;
use rk_core::{
    CatalogEntry, Column, Connector, EntryKind, EntrySpec, ErrorCode, ReconcileError,
    SourceFormat, SourceSpec,
};
use rk_db::{quote_literal, Database, DbError, DbResult, RelationKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// On-disk shape of a source artifact
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceFile {
    #[serde(default)]
    #[allow(dead_code)]
    kind: Option<String>,
    #[serde(default, alias = "type")]
    connector: Option<String>,
    #[serde(default, alias = "uri")]
    path: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    max_rows: Option<u64>,
    #[serde(default, alias = "timeout_seconds")]
    timeout: Option<u64>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

fn parse_connector(value: &str) -> Option<Connector> {
    match value.to_ascii_lowercase().replace('-', "_").as_str() {
        "local_file" | "file" | "local" => Some(Connector::LocalFile),
        "https" | "http" => Some(Connector::Https),
        "s3" => Some(Connector::S3),
        "gcs" | "gs" => Some(Connector::Gcs),
        _ => None,
    }
}

fn parse_format(value: &str) -> Option<SourceFormat> {
    match value.to_ascii_lowercase().as_str() {
        "csv" | "tsv" => Some(SourceFormat::Csv),
        "parquet" => Some(SourceFormat::Parquet),
        "json" | "ndjson" | "jsonl" => Some(SourceFormat::Json),
        _ => None,
    }
}

/// Connector implied by a path's scheme
fn infer_connector(path: &str) -> Connector {
    let lower = path.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Connector::Https
    } else if lower.starts_with("s3://") {
        Connector::S3
    } else if lower.starts_with("gs://") || lower.starts_with("gcs://") {
        Connector::Gcs
    } else {
        Connector::LocalFile
    }
}

fn is_option_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a reader option value: booleans and numbers stay bare
fn option_value(value: &str) -> String {
    let lower = value.to_ascii_lowercase();
    if lower == "true" || lower == "false" || value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        quote_literal(value)
    }
}

/// The SELECT that reads a source's data
pub(crate) fn ingest_query(spec: &SourceSpec, base_dir: Option<&Path>) -> Option<String> {
    let reader = match spec.effective_format()? {
        SourceFormat::Csv => "read_csv_auto",
        SourceFormat::Parquet => "read_parquet",
        SourceFormat::Json => "read_json_auto",
    };
    let location = match (spec.connector, base_dir) {
        (Connector::LocalFile, Some(dir)) if Path::new(&spec.path).is_relative() => {
            dir.join(&spec.path).display().to_string()
        }
        _ => spec.path.clone(),
    };

    let mut args = vec![quote_literal(&location)];
    for (key, value) in &spec.properties {
        args.push(format!("{key} = {}", option_value(value)));
    }
    let mut sql = format!("SELECT * FROM {reader}({})", args.join(", "));
    if let Some(max_rows) = spec.max_rows {
        sql.push_str(&format!(" LIMIT {max_rows}"));
    }
    Some(sql)
}

pub struct SourceHandler;

#[async_trait]
impl KindHandler for SourceHandler {
    fn kind(&self) -> EntryKind {
        EntryKind::Source
    }

    fn compile(&self, ctx: &CompileContext<'_>, blob: &str) -> Result<EntrySpec, Vec<ReconcileError>> {
        let file: SourceFile = parse_yaml(ctx.path, blob).map_err(|e| vec![e])?;
        let mut errors = Vec::new();

        let path = match file.path.as_deref() {
            Some(raw) => match ctx.templates.render_value(raw) {
                Ok(rendered) => rendered.trim().to_string(),
                Err(e) => {
                    errors.push(template_error(ctx.path, e, 1, Some("path")));
                    String::new()
                }
            },
            None => String::new(),
        };

        let connector = match file.connector.as_deref() {
            Some(raw) => parse_connector(raw).unwrap_or_else(|| {
                errors.push(
                    ReconcileError::new(
                        ErrorCode::Validation,
                        ctx.path,
                        format!("unknown connector '{raw}' (expected local_file, https, s3 or gcs)"),
                    )
                    .with_property_path("connector"),
                );
                infer_connector(&path)
            }),
            None => infer_connector(&path),
        };

        let format = match file.format.as_deref() {
            Some(raw) => {
                let parsed = parse_format(raw);
                if parsed.is_none() {
                    errors.push(
                        ReconcileError::new(
                            ErrorCode::Validation,
                            ctx.path,
                            format!("unknown format '{raw}' (expected csv, parquet or json)"),
                        )
                        .with_property_path("format"),
                    );
                }
                parsed
            }
            None => None,
        };

        let mut properties = BTreeMap::new();
        for (key, raw) in &file.properties {
            let property = format!("properties.{key}");
            match ctx.templates.render_value(raw) {
                Ok(value) => {
                    properties.insert(key.clone(), value);
                }
                Err(e) => errors.push(template_error(ctx.path, e, 1, Some(&property))),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(EntrySpec::Source(SourceSpec {
            connector,
            path,
            format,
            max_rows: file.max_rows,
            timeout_seconds: file.timeout,
            properties,
            columns: Vec::new(),
        }))
    }

    fn validate(&self, path: &str, spec: &EntrySpec, _scope: &Scope) -> Vec<ReconcileError> {
        let EntrySpec::Source(source) = spec else {
            return Vec::new();
        };
        let mut errors = Vec::new();
        let invalid = |property: &str, msg: String| {
            ReconcileError::new(ErrorCode::Validation, path, msg).with_property_path(property)
        };

        if source.path.is_empty() {
            errors.push(invalid("path", "source path is required".to_string()));
        } else {
            if infer_connector(&source.path) != source.connector {
                errors.push(invalid(
                    "connector",
                    format!(
                        "connector '{}' does not match path '{}'",
                        source.connector, source.path
                    ),
                ));
            }
            if source.effective_format().is_none() {
                errors.push(invalid(
                    "format",
                    format!(
                        "cannot infer a format from '{}'; set format to csv, parquet or json",
                        source.path
                    ),
                ));
            }
        }
        if source.timeout_seconds == Some(0) {
            errors.push(invalid("timeout", "timeout must be greater than zero".to_string()));
        }
        if source.max_rows == Some(0) {
            errors.push(invalid("max_rows", "max_rows must be greater than zero".to_string()));
        }
        for key in source.properties.keys() {
            if !is_option_key(key) {
                errors.push(invalid(
                    &format!("properties.{key}"),
                    format!("'{key}' is not a valid reader option name"),
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
        let EntrySpec::Source(source) = spec else {
            return Err(vec![ReconcileError::new(
                ErrorCode::Unspecified,
                ctx.path,
                "source handler received a non-source spec",
            )]);
        };
        let Some(select) = ingest_query(source, ctx.base_dir.map(|p| p.as_path())) else {
            return Err(vec![ReconcileError::new(
                ErrorCode::Validation,
                ctx.path,
                "source format is unknown",
            )
            .with_property_path("format")]);
        };

        let name = ctx.name.as_str();
        ensure_relation_kind(ctx.olap, name, RelationKind::Table)
            .await
            .map_err(|e| vec![ReconcileError::new(ErrorCode::Olap, ctx.path, e.to_string())])?;

        log::debug!("Ingesting source {} from {}", name, source.path);
        let ingest = ctx.olap.create_table_as(name, &select, true);
        let outcome = match source.timeout_seconds {
            Some(secs) => ingest_with_timeout(ctx.olap, ingest, Duration::from_secs(secs))
                .await
                .map_err(|_| {
                    vec![ReconcileError::new(
                        ErrorCode::Source,
                        ctx.path,
                        format!("ingestion timed out after {secs}s"),
                    )]
                })?,
            None => ingest.await,
        };
        outcome.map_err(|e| vec![source_error(ctx.path, e)])?;

        ctx.olap
            .describe(name)
            .await
            .map_err(|e| vec![ReconcileError::new(ErrorCode::Olap, ctx.path, e.to_string())])
    }

    async fn drop(&self, olap: &dyn Database, entry: &CatalogEntry) -> DbResult<()> {
        olap.drop_if_exists(entry.name.as_str()).await
    }

    fn supports_rename(&self) -> bool {
        true
    }
}

/// Marker for an ingestion cancelled after its deadline
#[derive(Debug)]
pub(crate) struct Elapsed;

/// Run `ingest` with a deadline. Past the deadline the running statement is
/// interrupted and awaited, so it has rolled back and released the
/// connection before this returns. An ingestion that finishes before the
/// interrupt lands keeps its result.
pub(crate) async fn ingest_with_timeout<F>(
    olap: &dyn Database,
    ingest: F,
    deadline: Duration,
) -> Result<DbResult<()>, Elapsed>
where
    F: Future<Output = DbResult<()>>,
{
    tokio::pin!(ingest);
    if let Ok(outcome) = tokio::time::timeout(deadline, &mut ingest).await {
        return Ok(outcome);
    }
    loop {
        // The statement may not have started yet; repeat until it stops
        olap.interrupt();
        match tokio::time::timeout(INTERRUPT_RETRY, &mut ingest).await {
            Ok(Ok(())) => {
                log::warn!("Ingestion finished past its deadline before it could be interrupted");
                return Ok(Ok(()));
            }
            Ok(Err(e)) => {
                log::debug!("Interrupted ingestion: {e}");
                return Err(Elapsed);
            }
            Err(_) => continue,
        }
    }
}

const INTERRUPT_RETRY: Duration = Duration::from_millis(50);

/// Ingestion failures are the connector's fault unless access was refused.
fn source_error(path: &str, err: DbError) -> ReconcileError {
    let code = if err.is_permission_denied() {
        ErrorCode::SourcePermissionDenied
    } else {
        ErrorCode::Source
    };
    ReconcileError::new(code, path, err.to_string())
}

#[cfg(test)]
#[path = "source_test.rs"]
mod tests;
