// dbrotate/src/backup/layout.rs
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{LayoutConfig, RetentionPolicy};
use crate::errors::{Result, RotateError};

/// Database name used for artifacts that do not belong to a single database.
pub const GLOBAL_SUBDIR: &str = "__GLOBAL__";
pub const DEFAULT_HOST: &str = "localhost";

/// Backup types whose tree gets a host segment.
const HOST_SCOPED_TYPES: &[&str] = &["postgresql", "mysql", "mongodb", "redis", "elasticsearch"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Dumps,
    Daily,
    Weekly,
    Monthly,
    LastSnapshots,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Dumps,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::LastSnapshots,
    ];

    /// Every tier holding references to a `dumps` master.
    pub const DERIVED: [Tier; 4] = [
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::LastSnapshots,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Tier::Dumps => "dumps",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
            Tier::LastSnapshots => "lastsnapshots",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One `(backup_type, host, database)` tree on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNamespace {
    pub backup_type: String,
    pub host: Option<String>,
    pub database: String,
    dir: PathBuf,
}

impl BackupNamespace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.dir.join(tier.dir_name())
    }
}

/// Host segment for host-scoped backup types, `None` for the others.
pub fn resolve_host(config: &LayoutConfig) -> Option<String> {
    if !HOST_SCOPED_TYPES.contains(&config.backup_type.as_str()) {
        return None;
    }
    let host = config
        .host
        .as_deref()
        .or(config.connection_host.as_deref())
        .unwrap_or(DEFAULT_HOST);
    Some(host.to_string())
}

/// Computes the directory holding one sub-directory per database.
///
/// An explicit `backup_dir` wins; otherwise the root is
/// `<top_backup_dir>/<backup_type>[/<host>]`.
pub fn backup_root(config: &LayoutConfig) -> PathBuf {
    if let Some(dir) = &config.backup_dir {
        return dir.clone();
    }
    let mut root = config.top_backup_dir.join(&config.backup_type);
    if let Some(host) = resolve_host(config) {
        root.push(host);
    }
    root
}

#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    root: PathBuf,
    backup_type: String,
    host: Option<String>,
}

impl DirectoryLayout {
    pub fn from_config(config: &LayoutConfig) -> Self {
        DirectoryLayout {
            root: backup_root(config),
            backup_type: config.backup_type.clone(),
            host: resolve_host(config),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves the namespace of `database`, rejecting names that are not a single path component.
    pub fn namespace(&self, database: &str) -> Result<BackupNamespace> {
        if database.is_empty()
            || database == "."
            || database == ".."
            || database.contains('/')
            || database.contains('\0')
        {
            return Err(RotateError::Config(format!(
                "invalid database name for a backup directory: {:?}",
                database
            )));
        }
        Ok(BackupNamespace {
            backup_type: self.backup_type.clone(),
            host: self.host.clone(),
            database: database.to_string(),
            dir: self.root.join(database),
        })
    }

    /// Creates `dumps` and every enabled tier directory of `ns`. Safe to call repeatedly.
    pub fn ensure_namespace_dirs(&self, ns: &BackupNamespace, policy: &RetentionPolicy) -> Result<()> {
        for tier in Tier::ALL {
            if !policy.is_enabled(tier) {
                continue;
            }
            let dir = ns.tier_dir(tier);
            fs::create_dir_all(&dir).map_err(|e| RotateError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Every database directory currently present under the root, sorted by name.
    pub fn list_namespaces(&self) -> Result<Vec<BackupNamespace>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                RotateError::io(path, e.into())
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) => names.push(name.to_string()),
                None => tracing::warn!(
                    "Skipping non UTF-8 backup directory {}",
                    entry.path().display()
                ),
            }
        }
        names.sort();
        names.iter().map(|name| self.namespace(name)).collect()
    }
}
