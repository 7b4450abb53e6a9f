//! Reconcile command implementation

use anyhow::{Context, Result};
use rk_runtime::ReconcileOptions;

use crate::cli::{GlobalArgs, ReconcileArgs};
use crate::commands::common::{open_instance, report, verbose};

/// Execute the reconcile command
pub async fn execute(args: &ReconcileArgs, global: &GlobalArgs) -> Result<()> {
    let instance = open_instance(global).await?;
    let options = ReconcileOptions::changed(args.changed.iter().cloned())
        .with_forced(args.forced.iter().cloned())
        .with_dry(args.flags.dry)
        .with_strict(args.flags.strict);

    if options.changed_paths.is_empty() {
        verbose(global, "Reconciling every artifact");
    } else {
        verbose(
            global,
            &format!("Reconciling changes to {}", options.changed_paths.join(", ")),
        );
    }

    let result = instance
        .reconcile(options)
        .await
        .context("Reconcile failed")?;
    verbose(
        global,
        &format!("Catalog generation is now {}", instance.snapshot().generation()),
    );
    report(&result, args.flags.output, args.flags.dry)
}
