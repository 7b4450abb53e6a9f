//! Per-kind compile, validate, migrate and drop behaviour
//!
//! Entry kinds are a closed sum type ([`EntrySpec`]); each kind has one
//! [`KindHandler`] and [`handler_for`] dispatches on the kind.

mod metrics_view;
mod model;
mod source;
mod table;

pub use metrics_view::MetricsViewHandler;
pub use model::ModelHandler;
pub use source::SourceHandler;
pub use table::TableHandler;

use crate::template::{TemplateEngine, TemplateError};
use async_trait::async_trait;
use rk_core::{
    CatalogEntry, Column, EntryKind, EntryName, EntrySpec, ErrorCode, ReconcileError,
};
use rk_db::{Database, DbResult, RelationKind};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;

/// Inputs available to a compiler
pub struct CompileContext<'a> {
    pub path: &'a str,
    pub name: &'a EntryName,
    pub templates: &'a TemplateEngine,
}

/// What validation may know about another entry
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRef {
    pub kind: EntryKind,
    /// Empty when not known yet (e.g. never migrated)
    pub columns: Vec<Column>,
}

/// Entries visible to validation: the committed catalog overlaid with
/// what the current run has already produced.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    relations: HashMap<String, RelationRef>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CatalogEntry>) -> Self {
        let mut scope = Self::new();
        for entry in entries {
            scope.insert(entry.name.as_str(), &entry.spec);
        }
        scope
    }

    pub fn insert(&mut self, name: &str, spec: &EntrySpec) {
        self.relations.insert(
            name.to_ascii_lowercase(),
            RelationRef {
                kind: spec.kind(),
                columns: spec.columns().to_vec(),
            },
        );
    }

    pub fn remove(&mut self, name: &str) {
        self.relations.remove(&name.to_ascii_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<&RelationRef> {
        self.relations.get(&name.to_ascii_lowercase())
    }
}

/// Inputs available to a migration
pub struct MigrateContext<'a> {
    pub olap: &'a dyn Database,
    pub path: &'a str,
    pub name: &'a EntryName,
    /// Entry committed before this run, if any
    pub previous: Option<&'a CatalogEntry>,
    /// Directory relative local source paths resolve against
    pub base_dir: Option<&'a PathBuf>,
}

/// Capability interface implemented once per entry kind
#[async_trait]
pub trait KindHandler: Send + Sync {
    fn kind(&self) -> EntryKind;

    /// Turn artifact text into a typed spec. Failures are `CODE_SYNTAX`.
    fn compile(&self, ctx: &CompileContext<'_>, blob: &str) -> Result<EntrySpec, Vec<ReconcileError>>;

    /// Structural and reference checks against `scope`.
    fn validate(&self, path: &str, spec: &EntrySpec, scope: &Scope) -> Vec<ReconcileError>;

    /// Apply the spec to the OLAP store, returning the resulting columns.
    async fn migrate(
        &self,
        ctx: &MigrateContext<'_>,
        spec: &EntrySpec,
    ) -> Result<Vec<Column>, Vec<ReconcileError>>;

    /// Remove the entry's OLAP object, if it has one.
    async fn drop(&self, olap: &dyn Database, entry: &CatalogEntry) -> DbResult<()>;

    /// Whether the OLAP object can be renamed in place when the entry is.
    fn supports_rename(&self) -> bool {
        false
    }
}

static TABLE: TableHandler = TableHandler;
static SOURCE: SourceHandler = SourceHandler;
static MODEL: ModelHandler = ModelHandler;
static METRICS_VIEW: MetricsViewHandler = MetricsViewHandler;

/// The handler for `kind`
pub fn handler_for(kind: EntryKind) -> &'static dyn KindHandler {
    match kind {
        EntryKind::Table => &TABLE,
        EntryKind::Source => &SOURCE,
        EntryKind::Model => &MODEL,
        EntryKind::MetricsView => &METRICS_VIEW,
    }
}

/// Deserialize a YAML artifact, mapping failures to `CODE_SYNTAX` with the
/// parser's location.
pub(crate) fn parse_yaml<T: DeserializeOwned>(path: &str, blob: &str) -> Result<T, ReconcileError> {
    serde_yaml::from_str(blob).map_err(|e| {
        let (line, column) = e
            .location()
            .map(|loc| (loc.line() as u32, loc.column() as u32))
            .unwrap_or((0, 0));
        ReconcileError::new(ErrorCode::Syntax, path, format!("invalid YAML: {e}")).at(line, column)
    })
}

/// Map a template failure to `CODE_SYNTAX`, offset by the line the template
/// started on inside the artifact.
pub(crate) fn template_error(
    path: &str,
    err: TemplateError,
    first_line: usize,
    property: Option<&str>,
) -> ReconcileError {
    let line = err.line.map(|l| l + first_line.saturating_sub(1)).unwrap_or(0);
    let mut out = ReconcileError::new(ErrorCode::Syntax, path, err.message).at(line as u32, 1);
    if let Some(property) = property {
        out = out.with_property_path(property);
    }
    out
}

/// Drop `name` if it exists as the other kind of relation than `wanted`.
pub(crate) async fn ensure_relation_kind(
    olap: &dyn Database,
    name: &str,
    wanted: RelationKind,
) -> DbResult<()> {
    match olap.relation_kind(name).await? {
        Some(existing) if existing != wanted => {
            log::debug!(
                "Dropping {} {} before creating it as a {}",
                existing.keyword(),
                name,
                wanted.keyword()
            );
            olap.drop_if_exists(name).await
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Named {
        name: String,
    }

    #[test]
    fn test_parse_yaml_error_has_location() {
        let err = parse_yaml::<Named>("/x.yaml", "name: ok\nname: [\n").unwrap_err();
        assert_eq!(err.code, ErrorCode::Syntax);
        assert_eq!(err.file_path, "/x.yaml");
        assert!(err.start_location.is_some());
    }

    #[test]
    fn test_handler_dispatch_matches_kind() {
        for kind in [
            EntryKind::Table,
            EntryKind::Source,
            EntryKind::Model,
            EntryKind::MetricsView,
        ] {
            assert_eq!(handler_for(kind).kind(), kind);
        }
        assert!(handler_for(EntryKind::Model).supports_rename());
        assert!(!handler_for(EntryKind::MetricsView).supports_rename());
    }

    #[test]
    fn test_template_error_offsets_line() {
        let err = template_error(
            "/s.yaml",
            TemplateError {
                message: "boom".into(),
                line: Some(1),
            },
            4,
            Some("path"),
        );
        assert_eq!(err.start_location.map(|l| l.line), Some(4));
        assert_eq!(err.property_path, vec!["path"]);
    }
}
