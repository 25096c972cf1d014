// dbrotate/src/backup/mod.rs
pub(crate) mod compressor;
pub(crate) mod layout;
mod logic;
pub(crate) mod placement;
pub(crate) mod store;

use anyhow::Result;
use std::path::Path;

use crate::backup::placement::LogicalTimestamp;
use crate::config::AppConfig;

/// Public entry point for storing one finished dump of `database`.
pub fn run_backup_flow(app_config: &AppConfig, dump: &Path, database: &str) -> Result<()> {
    logic::perform_backup_orchestration(app_config, dump, database, &LogicalTimestamp::now())
}
