// dbrotate/src/config/mod.rs
use anyhow::{Context, Result};
use chrono::Weekday;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::compressor::Codec;
use crate::backup::layout::Tier;

const DEFAULT_TOP_BACKUP_DIR: &str = "/var/backups/dbrotate";
const DEFAULT_BACKUP_TYPE: &str = "postgresql";
const DEFAULT_DUMP_EXTENSION: &str = "sql";
const DEFAULT_CANDIDATES: &[&str] = &["xz", "bzip2", "gzip", "nocomp"];

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRetentionConfig {
    pub keep_dumps: Option<usize>,
    pub keep_days: Option<usize>,
    pub keep_weeks: Option<usize>,
    pub keep_months: Option<usize>,
    pub keep_lasts: Option<usize>,
    pub weekly_day: Option<u32>,
    pub monthly_day: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonCompressionConfig {
    pub codec: Option<String>,
    pub candidates: Option<Vec<String>>,
    pub xz: Option<String>,
    pub bzip2: Option<String>,
    pub gzip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub top_backup_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub backup_type: Option<String>,
    pub host: Option<String>,
    pub connection_host: Option<String>,
    #[serde(default)]
    pub retention: JsonRetentionConfig,
    #[serde(default)]
    pub compression: JsonCompressionConfig,
    pub run_as: Option<String>,
    pub link_mode: Option<String>,
    pub dump_extension: Option<String>,
    pub log_file: Option<PathBuf>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutConfig {
    pub top_backup_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub backup_type: String,
    pub host: Option<String>,
    pub connection_host: Option<String>,
}

/// Keep-counts per tier plus the representative-run settings.
///
/// A keep-count of `None` or `Some(0)` disables the tier. `dumps` always
/// exists; without a keep-count it is never pruned by count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_dumps: Option<usize>,
    pub keep_days: Option<usize>,
    pub keep_weeks: Option<usize>,
    pub keep_months: Option<usize>,
    pub keep_lasts: Option<usize>,
    pub weekly_day: Option<Weekday>,
    pub monthly_day: Option<u32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            keep_dumps: None,
            keep_days: Some(14),
            keep_weeks: Some(8),
            keep_months: Some(12),
            keep_lasts: Some(2),
            weekly_day: None,
            monthly_day: None,
        }
    }
}

impl RetentionPolicy {
    pub fn keep_count(&self, tier: Tier) -> Option<usize> {
        let count = match tier {
            Tier::Dumps => self.keep_dumps,
            Tier::Daily => self.keep_days,
            Tier::Weekly => self.keep_weeks,
            Tier::Monthly => self.keep_months,
            Tier::LastSnapshots => self.keep_lasts,
        };
        count.filter(|keep| *keep > 0)
    }

    pub fn is_enabled(&self, tier: Tier) -> bool {
        tier == Tier::Dumps || self.keep_count(tier).is_some()
    }

    pub fn enabled_derived(&self) -> Vec<Tier> {
        Tier::DERIVED
            .into_iter()
            .filter(|tier| self.is_enabled(*tier))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOverrides {
    pub xz: Option<PathBuf>,
    pub bzip2: Option<PathBuf>,
    pub gzip: Option<PathBuf>,
}

impl CodecOverrides {
    pub fn for_codec(&self, codec: Codec) -> Option<&Path> {
        match codec {
            Codec::Xz => self.xz.as_deref(),
            Codec::Bzip2 => self.bzip2.as_deref(),
            Codec::Gzip => self.gzip.as_deref(),
            Codec::NoComp => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    pub requested: Option<String>,
    pub candidates: Vec<String>,
    pub overrides: CodecOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Hardlink,
    Copy,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub layout: LayoutConfig,
    pub retention: RetentionPolicy,
    pub compression: CompressionConfig,
    pub run_as: Option<String>,
    pub link_mode: LinkMode,
    pub dump_extension: String,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    /// Reads `config_path` (if present), applies process environment overrides and validates.
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let mut raw_json_config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str::<RawJsonConfig>(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig::default()
        };

        apply_env_overrides(&mut raw_json_config, |key| std::env::var(key).ok())?;
        AppConfig::from_raw(raw_json_config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let layout = LayoutConfig {
            top_backup_dir: raw
                .top_backup_dir
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOP_BACKUP_DIR)),
            backup_dir: raw.backup_dir.filter(|p| !p.as_os_str().is_empty()),
            backup_type: non_empty(raw.backup_type).unwrap_or_else(|| DEFAULT_BACKUP_TYPE.to_string()),
            host: non_empty(raw.host),
            connection_host: non_empty(raw.connection_host),
        };
        if layout.backup_type.contains('/') {
            anyhow::bail!("backup_type cannot contain '/': {}", layout.backup_type);
        }

        let defaults = RetentionPolicy::default();
        let retention_raw = raw.retention;
        let monthly_day = retention_raw.monthly_day;
        if let Some(day) = monthly_day {
            if !(1..=31).contains(&day) {
                anyhow::bail!("monthly_day must be between 1 and 31, got {}", day);
            }
        }
        let retention = RetentionPolicy {
            keep_dumps: retention_raw.keep_dumps.or(defaults.keep_dumps),
            keep_days: retention_raw.keep_days.or(defaults.keep_days),
            keep_weeks: retention_raw.keep_weeks.or(defaults.keep_weeks),
            keep_months: retention_raw.keep_months.or(defaults.keep_months),
            keep_lasts: retention_raw.keep_lasts.or(defaults.keep_lasts),
            weekly_day: retention_raw.weekly_day.map(parse_weekday).transpose()?,
            monthly_day,
        };

        let compression_raw = raw.compression;
        let candidates = compression_raw
            .candidates
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect());
        let compression = CompressionConfig {
            requested: non_empty(compression_raw.codec),
            candidates,
            overrides: CodecOverrides {
                xz: non_empty(compression_raw.xz).map(PathBuf::from),
                bzip2: non_empty(compression_raw.bzip2).map(PathBuf::from),
                gzip: non_empty(compression_raw.gzip).map(PathBuf::from),
            },
        };

        let link_mode = match non_empty(raw.link_mode).as_deref() {
            None | Some("hardlink") => LinkMode::Hardlink,
            Some("copy") => LinkMode::Copy,
            Some(other) => anyhow::bail!("link_mode must be 'hardlink' or 'copy', got '{}'", other),
        };

        let dump_extension = non_empty(raw.dump_extension)
            .map(|ext| ext.trim_start_matches('.').to_string())
            .unwrap_or_else(|| DEFAULT_DUMP_EXTENSION.to_string());

        Ok(AppConfig {
            layout,
            retention,
            compression,
            run_as: non_empty(raw.run_as),
            link_mode,
            dump_extension,
            log_file: raw.log_file.filter(|p| !p.as_os_str().is_empty()),
        })
    }
}

/// Overlays environment variables on top of the JSON values.
///
/// A variable that is set but empty clears the JSON value.
pub fn apply_env_overrides<F>(raw: &mut RawJsonConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("TOP_BACKUPDIR") {
        raw.top_backup_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("BACKUPDIR") {
        raw.backup_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("BACKUP_TYPE") {
        raw.backup_type = Some(v);
    }
    if let Some(v) = lookup("HOST") {
        raw.host = Some(v);
    }
    if let Some(v) = lookup("PGHOST") {
        raw.connection_host = Some(v);
    }

    let retention = &mut raw.retention;
    override_number(&lookup, "KEEP_DUMPS", &mut retention.keep_dumps)?;
    override_number(&lookup, "KEEP_DAYS", &mut retention.keep_days)?;
    override_number(&lookup, "KEEP_WEEKS", &mut retention.keep_weeks)?;
    override_number(&lookup, "KEEP_MONTHES", &mut retention.keep_months)?;
    override_number(&lookup, "KEEP_MONTHS", &mut retention.keep_months)?;
    override_number(&lookup, "KEEP_LASTS", &mut retention.keep_lasts)?;
    override_number(&lookup, "DOWEEKLY", &mut retention.weekly_day)?;
    override_number(&lookup, "DOMONTHLY", &mut retention.monthly_day)?;

    let compression = &mut raw.compression;
    if let Some(v) = lookup("COMP") {
        compression.codec = Some(v);
    }
    if let Some(v) = lookup("COMPS") {
        compression.candidates = Some(v.split_whitespace().map(str::to_string).collect());
    }
    if let Some(v) = lookup("XZ_BIN") {
        compression.xz = Some(v);
    }
    if let Some(v) = lookup("BZIP2_BIN") {
        compression.bzip2 = Some(v);
    }
    if let Some(v) = lookup("GZIP_BIN") {
        compression.gzip = Some(v);
    }

    if let Some(v) = lookup("RUNAS") {
        raw.run_as = Some(v);
    }
    if let Some(v) = lookup("LINK_MODE") {
        raw.link_mode = Some(v);
    }
    if let Some(v) = lookup("DUMP_EXT") {
        raw.dump_extension = Some(v);
    }
    if let Some(v) = lookup("DBROTATE_LOGFILE") {
        raw.log_file = Some(PathBuf::from(v));
    }
    Ok(())
}

fn override_number<F, T>(lookup: &F, key: &str, slot: &mut Option<T>) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(value) = lookup(key) else {
        return Ok(());
    };
    let value = value.trim();
    *slot = if value.is_empty() {
        None
    } else {
        Some(
            value
                .parse::<T>()
                .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, value))?,
        )
    };
    Ok(())
}

fn parse_weekday(day: u32) -> Result<Weekday> {
    Ok(match day {
        1 => Weekday::Mon,
        2 => Weekday::Tue,
        3 => Weekday::Wed,
        4 => Weekday::Thu,
        5 => Weekday::Fri,
        6 => Weekday::Sat,
        7 => Weekday::Sun,
        _ => anyhow::bail!("weekly_day must be between 1 (Monday) and 7 (Sunday), got {}", day),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_empty_config() -> anyhow::Result<()> {
        let config = AppConfig::from_raw(RawJsonConfig::default())?;

        assert_eq!(config.layout.top_backup_dir, PathBuf::from(DEFAULT_TOP_BACKUP_DIR));
        assert_eq!(config.layout.backup_type, "postgresql");
        assert_eq!(config.retention, RetentionPolicy::default());
        assert_eq!(config.compression.candidates, vec!["xz", "bzip2", "gzip", "nocomp"]);
        assert_eq!(config.compression.requested, None);
        assert_eq!(config.link_mode, LinkMode::Hardlink);
        assert_eq!(config.dump_extension, "sql");
        Ok(())
    }

    #[test]
    fn test_json_config_is_parsed() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "top_backup_dir": "/srv/backups",
                "backup_type": "mysql",
                "host": "db1",
                "retention": { "keep_days": 9, "keep_weeks": 3, "keep_months": 1, "weekly_day": 7 },
                "compression": { "codec": "gzip", "candidates": ["gzip", "nocomp"], "gzip": "/opt/gzip" },
                "run_as": "postgres",
                "link_mode": "copy",
                "dump_extension": ".dump"
            }"#,
        )?;

        let mut raw: RawJsonConfig = serde_json::from_str(&fs::read_to_string(&path)?)?;
        apply_env_overrides(&mut raw, env_of(&[]))?;
        let config = AppConfig::from_raw(raw)?;

        assert_eq!(config.layout.top_backup_dir, PathBuf::from("/srv/backups"));
        assert_eq!(config.layout.backup_type, "mysql");
        assert_eq!(config.layout.host.as_deref(), Some("db1"));
        assert_eq!(config.retention.keep_days, Some(9));
        assert_eq!(config.retention.keep_weeks, Some(3));
        assert_eq!(config.retention.keep_months, Some(1));
        assert_eq!(config.retention.keep_lasts, Some(2));
        assert_eq!(config.retention.weekly_day, Some(Weekday::Sun));
        assert_eq!(config.compression.requested.as_deref(), Some("gzip"));
        assert_eq!(config.compression.overrides.gzip, Some(PathBuf::from("/opt/gzip")));
        assert_eq!(config.run_as.as_deref(), Some("postgres"));
        assert_eq!(config.link_mode, LinkMode::Copy);
        assert_eq!(config.dump_extension, "dump");
        Ok(())
    }

    #[test]
    fn test_missing_config_file_uses_defaults() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let config = AppConfig::load_from_json(&tmp.path().join("absent.json"))?;
        assert_eq!(config.dump_extension, "sql");
        Ok(())
    }

    #[test]
    fn test_malformed_json_is_an_error() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("config.json");
        fs::write(&path, "{ not json")?;
        assert!(AppConfig::load_from_json(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_env_overrides_win_over_json() -> anyhow::Result<()> {
        let mut raw = RawJsonConfig {
            host: Some("from-json".to_string()),
            ..RawJsonConfig::default()
        };
        raw.retention.keep_days = Some(30);
        raw.compression.xz = Some("/opt/xz".to_string());

        apply_env_overrides(
            &mut raw,
            env_of(&[
                ("HOST", ""),
                ("PGHOST", "pg.internal"),
                ("KEEP_DAYS", "9"),
                ("KEEP_WEEKS", "3"),
                ("KEEP_MONTHES", "1"),
                ("COMP", "xz"),
                ("COMPS", "xz  nocomp"),
                ("XZ_BIN", ""),
                ("RUNAS", "postgres"),
            ]),
        )?;
        let config = AppConfig::from_raw(raw)?;

        assert_eq!(config.layout.host, None);
        assert_eq!(config.layout.connection_host.as_deref(), Some("pg.internal"));
        assert_eq!(config.retention.keep_days, Some(9));
        assert_eq!(config.retention.keep_weeks, Some(3));
        assert_eq!(config.retention.keep_months, Some(1));
        assert_eq!(config.compression.requested.as_deref(), Some("xz"));
        assert_eq!(config.compression.candidates, vec!["xz", "nocomp"]);
        assert_eq!(config.compression.overrides.xz, None);
        assert_eq!(config.run_as.as_deref(), Some("postgres"));
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut raw = RawJsonConfig::default();
        assert!(apply_env_overrides(&mut raw, env_of(&[("KEEP_DAYS", "many")])).is_err());

        let mut raw = RawJsonConfig::default();
        raw.retention.weekly_day = Some(8);
        assert!(AppConfig::from_raw(raw).is_err());

        let mut raw = RawJsonConfig::default();
        raw.retention.monthly_day = Some(0);
        assert!(AppConfig::from_raw(raw).is_err());

        let raw = RawJsonConfig {
            link_mode: Some("symlink".to_string()),
            ..RawJsonConfig::default()
        };
        assert!(AppConfig::from_raw(raw).is_err());
    }

    #[test]
    fn test_zero_keep_count_disables_tier() {
        let policy = RetentionPolicy {
            keep_weeks: Some(0),
            ..RetentionPolicy::default()
        };
        assert!(!policy.is_enabled(Tier::Weekly));
        assert!(policy.is_enabled(Tier::Dumps));
        assert_eq!(policy.keep_count(Tier::Dumps), None);
        assert_eq!(
            policy.enabled_derived(),
            vec![Tier::Daily, Tier::Monthly, Tier::LastSnapshots]
        );
    }
}
