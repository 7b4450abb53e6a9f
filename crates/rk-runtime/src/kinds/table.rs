//! Tables that already exist in the OLAP store

use super::{parse_yaml, CompileContext, KindHandler, MigrateContext, Scope};
use async_trait::async_trait;
use rk_core::{
    CatalogEntry, Column, EntryKind, EntrySpec, ErrorCode, ReconcileError, TableSpec,
};
use rk_db::{Database, DbResult};
use serde::Deserialize;

/// On-disk shape of a table artifact
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableFile {
    #[serde(default)]
    #[allow(dead_code)]
    kind: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

pub struct TableHandler;

#[async_trait]
impl KindHandler for TableHandler {
    fn kind(&self) -> EntryKind {
        EntryKind::Table
    }

    fn compile(&self, ctx: &CompileContext<'_>, blob: &str) -> Result<EntrySpec, Vec<ReconcileError>> {
        if !blob.trim().is_empty() {
            let _: TableFile = parse_yaml(ctx.path, blob).map_err(|e| vec![e])?;
        }
        Ok(EntrySpec::Table(TableSpec {
            managed: true,
            columns: Vec::new(),
        }))
    }

    fn validate(&self, _path: &str, _spec: &EntrySpec, _scope: &Scope) -> Vec<ReconcileError> {
        Vec::new()
    }

    async fn migrate(
        &self,
        ctx: &MigrateContext<'_>,
        _spec: &EntrySpec,
    ) -> Result<Vec<Column>, Vec<ReconcileError>> {
        let olap_error =
            |msg: String| vec![ReconcileError::new(ErrorCode::Olap, ctx.path, msg)];

        let exists = ctx
            .olap
            .relation_exists(ctx.name.as_str())
            .await
            .map_err(|e| olap_error(e.to_string()))?;
        if !exists {
            return Err(olap_error(format!(
                "table '{}' does not exist in the OLAP store",
                ctx.name
            )));
        }
        ctx.olap
            .describe(ctx.name.as_str())
            .await
            .map_err(|e| olap_error(e.to_string()))
    }

    async fn drop(&self, olap: &dyn Database, entry: &CatalogEntry) -> DbResult<()> {
        match &entry.spec {
            EntrySpec::Table(TableSpec { managed: true, .. }) => {
                olap.drop_if_exists(entry.name.as_str()).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "table_test.rs"]
mod tests;
