//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use rk_core::{ProjectConfig, ReconcileResult};
use rk_runtime::{Instance, InstanceConfig, RepoDriver};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::{GlobalArgs, OutputFormat};

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that RAII destructors run and cleanup happens properly.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) u8);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Control flow only; main.rs never prints it
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// Exit code for a run that reported per-artifact errors
pub(crate) const EXIT_RECONCILE_ERRORS: u8 = 2;

/// Print verbose output if enabled
pub(crate) fn verbose(global: &GlobalArgs, msg: &str) {
    if global.verbose {
        eprintln!("[verbose] {}", msg);
    }
}

/// Load `rekon.yml` from `--config` or the project directory.
///
/// Returns the canonical project root alongside the config.
pub(crate) fn load_config(global: &GlobalArgs) -> Result<(PathBuf, ProjectConfig)> {
    let root = std::fs::canonicalize(&global.project_dir)
        .with_context(|| format!("Project directory not found: {}", global.project_dir))?;
    let config = match &global.config {
        Some(path) => ProjectConfig::load(Path::new(path))
            .context("Failed to load configuration file")?,
        None => ProjectConfig::load_from_dir(&root)
            .context("Failed to load project configuration")?,
    };
    Ok((root, config))
}

/// Translate project settings into an instance rooted at `root`.
///
/// `--var` overrides win over config vars.
pub(crate) fn instance_config(
    root: &Path,
    config: &ProjectConfig,
    overrides: &[(String, String)],
) -> InstanceConfig {
    let overrides: BTreeMap<String, String> = overrides.iter().cloned().collect();
    InstanceConfig {
        id: Some(config.name.clone()),
        olap_driver: config.olap.driver,
        olap_dsn: config
            .olap_path_absolute(root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string()),
        repo_driver: RepoDriver::File,
        repo_dsn: root.display().to_string(),
        embed_catalog: config.embed_catalog,
        state_dir: (!config.embed_catalog).then(|| config.state_path_absolute(root)),
        threads: config.threads,
        vars: config.merged_vars(&overrides),
    }
}

/// Open the project's instance, restoring its persisted catalog
pub(crate) async fn open_instance(global: &GlobalArgs) -> Result<Instance> {
    let (root, config) = load_config(global)?;
    let instance_config = instance_config(&root, &config, &global.vars);
    verbose(
        global,
        &format!(
            "Opening project '{}' (olap={}, threads={})",
            config.name, instance_config.olap_dsn, instance_config.threads
        ),
    );
    Instance::open(instance_config)
        .await
        .context("Failed to open project instance")
}

/// Print a reconcile result and turn reported errors into a non-zero exit.
pub(crate) fn report(result: &ReconcileResult, output: OutputFormat, dry: bool) -> Result<()> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            for error in &result.errors {
                eprintln!("  {}", error);
            }
            let verb = if dry { "Validated" } else { "Reconciled" };
            println!(
                "{} {} paths: {} ok, {} errors",
                verb,
                result.affected_paths.len(),
                ok_count(result),
                result.errors.len()
            );
        }
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(ExitCode(EXIT_RECONCILE_ERRORS).into())
    }
}

/// Affected paths without any error
pub(crate) fn ok_count(result: &ReconcileResult) -> usize {
    result
        .affected_paths
        .iter()
        .filter(|path| result.errors_for(path).next().is_none())
        .count()
}

/// Calculate column widths for a table given headers and row data.
pub(crate) fn calculate_column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len());
        }
    }
    widths
}

/// Print a left-aligned table with a dashed separator under the header.
pub(crate) fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let widths = calculate_column_widths(headers, rows);
    let line = |cells: Vec<String>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<width$}", cell, width = w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!("{}", line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        println!("{}", line(row.clone()));
    }
}

#[cfg(test)]
#[path = "common_test.rs"]
mod tests;
