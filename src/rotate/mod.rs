// dbrotate/src/rotate/mod.rs
mod logic;
pub(crate) mod orphans;
pub(crate) mod pruner;
pub(crate) mod sorter;

use anyhow::Result;
use crate::config::AppConfig;

pub use logic::rotate_namespace;

/// Prunes every namespace under the backup root, then reclaims orphans.
pub fn run_rotate_flow(app_config: &AppConfig) -> Result<()> {
    logic::perform_rotation(app_config, false)
}

/// Reclaims orphans in every namespace without pruning by age.
pub fn run_cleanup_flow(app_config: &AppConfig) -> Result<()> {
    logic::perform_rotation(app_config, true)
}
