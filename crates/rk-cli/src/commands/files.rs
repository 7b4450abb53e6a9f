//! Artifact commands: put, rm, mv and refresh
//!
//! Each mutates the project's artifacts (if needed) and reconciles only
//! the touched paths and their dependents.

use anyhow::{Context, Result};
use std::io::Read;

use crate::cli::{GlobalArgs, MvArgs, PutArgs, RefreshArgs, RmArgs};
use crate::commands::common::{open_instance, report, verbose};

/// Read an artifact body from a file, or stdin for `-`
fn read_blob(file: &str) -> Result<String> {
    if file == "-" {
        let mut blob = String::new();
        std::io::stdin()
            .read_to_string(&mut blob)
            .context("Failed to read artifact from stdin")?;
        Ok(blob)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))
    }
}

/// Execute the put command
pub async fn put(args: &PutArgs, global: &GlobalArgs) -> Result<()> {
    let blob = read_blob(&args.file)?;
    let instance = open_instance(global).await?;
    verbose(global, &format!("Writing {} ({} bytes)", args.path, blob.len()));
    let result = instance
        .put_file_and_reconcile(
            &args.path,
            &blob,
            true,
            args.create_only,
            args.flags.dry,
            args.flags.strict,
        )
        .await
        .with_context(|| format!("Failed to put {}", args.path))?;
    report(&result, args.flags.output, args.flags.dry)
}

/// Execute the rm command
pub async fn rm(args: &RmArgs, global: &GlobalArgs) -> Result<()> {
    let instance = open_instance(global).await?;
    let result = instance
        .delete_file_and_reconcile(&args.path, args.flags.dry, args.flags.strict)
        .await
        .with_context(|| format!("Failed to delete {}", args.path))?;
    report(&result, args.flags.output, args.flags.dry)
}

/// Execute the mv command
pub async fn mv(args: &MvArgs, global: &GlobalArgs) -> Result<()> {
    let instance = open_instance(global).await?;
    let result = instance
        .rename_file_and_reconcile(&args.from, &args.to, args.flags.dry, args.flags.strict)
        .await
        .with_context(|| format!("Failed to move {} to {}", args.from, args.to))?;
    report(&result, args.flags.output, args.flags.dry)
}

/// Execute the refresh command
pub async fn refresh(args: &RefreshArgs, global: &GlobalArgs) -> Result<()> {
    let instance = open_instance(global).await?;
    let result = instance
        .refresh_and_reconcile(&args.path, args.flags.dry, args.flags.strict)
        .await
        .with_context(|| format!("Failed to refresh {}", args.path))?;
    report(&result, args.flags.output, args.flags.dry)
}
