//! Catalog entries and their kind-specific payloads.
//!
//! Entry kinds are a closed set, so the payload is a tagged enum
//! ([`EntrySpec`]) rather than a trait object. Behaviour that differs per
//! kind lives in the runtime's kind handlers.

use crate::entry_name::EntryName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// The kind of object a catalog entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A table that already exists in the OLAP store
    Table,
    /// Data ingested from an external location
    Source,
    /// A SQL transformation
    Model,
    /// A semantic layer definition over a model
    MetricsView,
}

impl EntryKind {
    /// Whether entries of this kind expose a relation other entries can select from.
    pub fn is_table_like(&self) -> bool {
        matches!(self, EntryKind::Table | EntryKind::Source | EntryKind::Model)
    }

    /// Human-readable label for messages.
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::Table => "table",
            EntryKind::Source => "source",
            EntryKind::Model => "model",
            EntryKind::MetricsView => "metrics view",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Table => write!(f, "table"),
            EntryKind::Source => write!(f, "source"),
            EntryKind::Model => write!(f, "model"),
            EntryKind::MetricsView => write!(f, "metrics_view"),
        }
    }
}

/// A column of a table-like entry, as reported by the OLAP store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// OLAP data type, e.g. `VARCHAR`
    #[serde(rename = "type")]
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Pre-existing OLAP table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// True when the table was declared by an artifact, false when it was
    /// discovered by scanning the information schema
    #[serde(default)]
    pub managed: bool,

    #[serde(default)]
    pub columns: Vec<Column>,
}

/// Where a source reads its data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    LocalFile,
    Https,
    S3,
    Gcs,
}

impl std::fmt::Display for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connector::LocalFile => write!(f, "local_file"),
            Connector::Https => write!(f, "https"),
            Connector::S3 => write!(f, "s3"),
            Connector::Gcs => write!(f, "gcs"),
        }
    }
}

/// File format of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Parquet,
    Json,
}

impl SourceFormat {
    /// Guess the format from the file extension of a path or URL.
    pub fn infer(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".csv") || lower.ends_with(".tsv") || lower.ends_with(".csv.gz") {
            Some(SourceFormat::Csv)
        } else if lower.ends_with(".parquet") {
            Some(SourceFormat::Parquet)
        } else if lower.ends_with(".json") || lower.ends_with(".ndjson") || lower.ends_with(".jsonl")
        {
            Some(SourceFormat::Json)
        } else {
            None
        }
    }
}

/// Data ingested from a connector into an OLAP table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub connector: Connector,

    /// Local path, URL or bucket URI
    pub path: String,

    /// Explicit format; inferred from `path` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SourceFormat>,

    /// Upper bound on ingested rows (head of the data)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u64>,

    /// Ingestion timeout enforced by the migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Connector-specific options, kept verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,

    #[serde(default)]
    pub columns: Vec<Column>,
}

impl SourceSpec {
    /// The format that will actually be used for ingestion.
    pub fn effective_format(&self) -> Option<SourceFormat> {
        self.format.or_else(|| SourceFormat::infer(&self.path))
    }
}

/// SQL dialect of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelDialect {
    #[default]
    DuckDb,
}

/// A SQL transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Rendered SQL (a single SELECT)
    pub sql: String,

    #[serde(default)]
    pub dialect: ModelDialect,

    /// Materialize as a table instead of a view
    #[serde(default)]
    pub materialize: bool,

    /// Relation names the SQL reads from
    #[serde(default)]
    pub references: BTreeSet<String>,

    #[serde(default)]
    pub columns: Vec<Column>,
}

/// Time grains understood by metrics views
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Column of the underlying model; defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Dimension {
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Aggregate SQL expression, e.g. `SUM(amount)`
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub valid_percent_of_total: bool,
}

/// Dimensions and measures defined over a table-like entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsViewSpec {
    /// Name of the underlying model, source or table
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_dimension: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smallest_time_grain: Option<TimeGrain>,
    /// ISO 8601 duration, e.g. `P7D`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_time_range: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_time_zones: Vec<String>,
}

/// Kind-specific payload of a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntrySpec {
    Table(TableSpec),
    Source(SourceSpec),
    Model(ModelSpec),
    MetricsView(MetricsViewSpec),
}

impl EntrySpec {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntrySpec::Table(_) => EntryKind::Table,
            EntrySpec::Source(_) => EntryKind::Source,
            EntrySpec::Model(_) => EntryKind::Model,
            EntrySpec::MetricsView(_) => EntryKind::MetricsView,
        }
    }

    /// Names this spec declares or infers a dependency on, lowercased like
    /// entry names.
    ///
    /// Schema-qualified model references are reduced to their last
    /// component, since entries live in the default schema.
    pub fn references(&self) -> BTreeSet<String> {
        match self {
            EntrySpec::Table(_) | EntrySpec::Source(_) => BTreeSet::new(),
            EntrySpec::Model(m) => m
                .references
                .iter()
                .map(|r| r.rsplit('.').next().unwrap_or(r).to_ascii_lowercase())
                .collect(),
            EntrySpec::MetricsView(mv) => BTreeSet::from([mv.model.to_ascii_lowercase()]),
        }
    }

    /// Columns of a table-like spec (empty for metrics views or before the
    /// first successful migration).
    pub fn columns(&self) -> &[Column] {
        match self {
            EntrySpec::Table(t) => &t.columns,
            EntrySpec::Source(s) => &s.columns,
            EntrySpec::Model(m) => &m.columns,
            EntrySpec::MetricsView(_) => &[],
        }
    }

    pub fn set_columns(&mut self, columns: Vec<Column>) {
        match self {
            EntrySpec::Table(t) => t.columns = columns,
            EntrySpec::Source(s) => s.columns = columns,
            EntrySpec::Model(m) => m.columns = columns,
            EntrySpec::MetricsView(_) => {}
        }
    }

    /// SHA-256 of the spec's definition, ignoring columns discovered by
    /// migrations. Two specs with equal checksums need no migration.
    pub fn checksum(&self) -> String {
        let mut definition = self.clone();
        definition.set_columns(Vec::new());
        let json = serde_json::to_string(&definition).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A resolved, typed object in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: EntryName,

    /// Originating artifact; `None` for embedded entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub spec: EntrySpec,

    /// Entries this one depends on (maintained by the catalog)
    #[serde(default)]
    pub parents: BTreeSet<EntryName>,

    /// Entries depending on this one (maintained by the catalog)
    #[serde(default)]
    pub children: BTreeSet<EntryName>,

    /// True when created programmatically with no backing artifact
    #[serde(default)]
    pub embedded: bool,

    /// Checksum of the compiled spec at the last successful migration
    #[serde(default)]
    pub checksum: String,

    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub refreshed_on: DateTime<Utc>,
}

impl CatalogEntry {
    /// Create an artifact-backed entry stamped with `now`.
    pub fn new(name: EntryName, path: impl Into<String>, spec: EntrySpec, now: DateTime<Utc>) -> Self {
        let checksum = spec.checksum();
        Self {
            name,
            path: Some(path.into()),
            spec,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            embedded: false,
            checksum,
            created_on: now,
            updated_on: now,
            refreshed_on: now,
        }
    }

    /// Create an embedded entry (no backing artifact).
    pub fn embedded(name: EntryName, spec: EntrySpec, now: DateTime<Utc>) -> Self {
        let checksum = spec.checksum();
        Self {
            name,
            path: None,
            spec,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            embedded: true,
            checksum,
            created_on: now,
            updated_on: now,
            refreshed_on: now,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.spec.kind()
    }
}

#[cfg(test)]
#[path = "entry_test.rs"]
mod tests;
