//! Catalog command implementation

use anyhow::{bail, Result};
use rk_core::{CatalogEntry, CatalogSnapshot, EntryKind};
use serde::Serialize;

use crate::cli::{CatalogArgs, CatalogCommands, CatalogLsArgs, CatalogShowArgs, GlobalArgs};
use crate::cli::{KindFilter, OutputFormat};
use crate::commands::common::{open_instance, print_table};

/// Execute a catalog subcommand
pub async fn execute(args: &CatalogArgs, global: &GlobalArgs) -> Result<()> {
    let instance = open_instance(global).await?;
    match &args.command {
        CatalogCommands::Ls(ls_args) => {
            ls(&instance.snapshot(), ls_args);
            Ok(())
        }
        CatalogCommands::Show(show_args) => show(&instance.snapshot(), show_args),
        CatalogCommands::Sync => {
            let changes = instance.sync_olap_tables().await?;
            println!("Synced OLAP tables: {} catalog changes", changes);
            Ok(())
        }
    }
}

impl From<KindFilter> for EntryKind {
    fn from(filter: KindFilter) -> Self {
        match filter {
            KindFilter::Table => EntryKind::Table,
            KindFilter::Source => EntryKind::Source,
            KindFilter::Model => EntryKind::Model,
            KindFilter::MetricsView => EntryKind::MetricsView,
        }
    }
}

/// One row of `catalog ls --output json`
#[derive(Debug, Serialize)]
struct EntryRow<'a> {
    name: &'a str,
    kind: EntryKind,
    path: Option<&'a str>,
    embedded: bool,
    columns: usize,
    parents: Vec<&'a str>,
    updated_on: String,
}

impl<'a> From<&'a CatalogEntry> for EntryRow<'a> {
    fn from(entry: &'a CatalogEntry) -> Self {
        Self {
            name: entry.name.as_str(),
            kind: entry.kind(),
            path: entry.path.as_deref(),
            embedded: entry.embedded,
            columns: entry.spec.columns().len(),
            parents: entry.parents.iter().map(|p| p.as_str()).collect(),
            updated_on: entry.updated_on.to_rfc3339(),
        }
    }
}

fn ls(snapshot: &CatalogSnapshot, args: &CatalogLsArgs) {
    let kind = args.kind.map(EntryKind::from);
    let rows: Vec<EntryRow<'_>> = snapshot
        .entries()
        .filter(|e| kind.is_none_or(|k| e.kind() == k))
        .map(EntryRow::from)
        .collect();

    match args.output {
        OutputFormat::Json => match serde_json::to_string_pretty(&rows) {
            Ok(json) => println!("{}", json),
            Err(e) => log::warn!("Failed to serialize catalog: {e}"),
        },
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("Catalog is empty (generation {})", snapshot.generation());
                return;
            }
            let table: Vec<Vec<String>> = rows
                .iter()
                .map(|row| {
                    vec![
                        row.name.to_string(),
                        row.kind.to_string(),
                        row.path.unwrap_or("(embedded)").to_string(),
                        row.columns.to_string(),
                        row.parents.join(", "),
                    ]
                })
                .collect();
            print_table(&["NAME", "KIND", "PATH", "COLUMNS", "DEPENDS ON"], &table);
            println!(
                "\n{} entries, generation {}",
                rows.len(),
                snapshot.generation()
            );
            let waiting = snapshot.unresolved_paths().count();
            if waiting > 0 {
                println!("{} paths waiting on missing dependencies", waiting);
            }
        }
    }
}

fn show(snapshot: &CatalogSnapshot, args: &CatalogShowArgs) -> Result<()> {
    let Some(entry) = snapshot.get(&args.name) else {
        bail!("No catalog entry named '{}'", args.name);
    };
    println!("{}", serde_json::to_string_pretty(entry)?);
    Ok(())
}
