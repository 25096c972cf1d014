// dbrotate/src/backup/logic.rs
use anyhow::{Context, Result};
use std::path::Path;

use crate::backup::compressor::CompressorSelector;
use crate::backup::layout::DirectoryLayout;
use crate::backup::placement::{BackupPlacement, LogicalTimestamp};
use crate::backup::store::store_for;
use crate::config::AppConfig;
use crate::errors::RotateError;
use crate::rotate::rotate_namespace;
use crate::utils::runas::PrivilegeRunner;

/// Stores `dump` for `database`, then rotates that namespace.
///
/// A partial fan-out does not stop rotation; it is reported once rotation is done.
pub fn perform_backup_orchestration(
    app_config: &AppConfig,
    dump: &Path,
    database: &str,
    ts: &LogicalTimestamp,
) -> Result<()> {
    let layout = DirectoryLayout::from_config(&app_config.layout);
    let ns = layout.namespace(database)?;
    layout
        .ensure_namespace_dirs(&ns, &app_config.retention)
        .with_context(|| format!("Failed to create backup directories under {}", ns.dir().display()))?;

    let runner = PrivilegeRunner::new(app_config.run_as.clone());
    let selector = CompressorSelector::from_env();
    let codec = selector.select(&app_config.compression);
    let compressor = selector.compressor(codec, &app_config.compression.overrides, &runner)?;
    let store = store_for(app_config.link_mode);

    let placement = BackupPlacement::new(&app_config.retention, store.as_ref(), &app_config.dump_extension);
    let fanout_error = match placement.place(&ns, dump, ts, &compressor) {
        Ok(placed) => {
            tracing::info!(
                "Stored {} ({} tier entries)",
                placed.master.display(),
                placed.entries.len()
            );
            None
        }
        Err(e @ RotateError::PartialFanout { .. }) => {
            tracing::error!("{}", e);
            Some(e)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to store {}", dump.display()));
        }
    };

    let summary = rotate_namespace(&ns, &app_config.retention, store.as_ref())
        .with_context(|| format!("Rotation failed for {}", ns.dir().display()))?;
    tracing::info!(
        "Rotation of {}/{}/{} removed {} entries",
        ns.backup_type,
        ns.host.as_deref().unwrap_or("-"),
        ns.database,
        summary.pruned.removed.len() + summary.reclaimed.len()
    );

    match fanout_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
