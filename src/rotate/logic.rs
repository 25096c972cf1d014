// dbrotate/src/rotate/logic.rs
use anyhow::{Context, Result};

use crate::backup::layout::{BackupNamespace, DirectoryLayout};
use crate::backup::store::{store_for, ContentStore};
use crate::config::{AppConfig, RetentionPolicy};
use crate::rotate::orphans::{OrphanReclaimer, ReclaimReport};
use crate::rotate::pruner::{PruneReport, RetentionPruner};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationSummary {
    pub pruned: PruneReport,
    pub reclaimed: ReclaimReport,
}

/// Prunes `ns` by age and then restores its master/derived consistency.
pub fn rotate_namespace(
    ns: &BackupNamespace,
    policy: &RetentionPolicy,
    store: &dyn ContentStore,
) -> crate::errors::Result<RotationSummary> {
    let pruned = RetentionPruner::new(policy).prune(ns)?;
    let reclaimed = OrphanReclaimer::new(policy, store).reclaim(ns)?;
    Ok(RotationSummary { pruned, reclaimed })
}

/// Runs rotation, or reclamation alone when `cleanup_only`, over every namespace under the root.
pub fn perform_rotation(app_config: &AppConfig, cleanup_only: bool) -> Result<()> {
    let layout = DirectoryLayout::from_config(&app_config.layout);
    let store = store_for(app_config.link_mode);
    let namespaces = layout
        .list_namespaces()
        .with_context(|| format!("Failed to list backups under {}", layout.root().display()))?;

    if namespaces.is_empty() {
        tracing::warn!("No backups found under {}", layout.root().display());
        return Ok(());
    }

    let mut removed = 0;
    for ns in &namespaces {
        if cleanup_only {
            let report = OrphanReclaimer::new(&app_config.retention, store.as_ref())
                .reclaim(ns)
                .with_context(|| format!("Orphan cleanup failed for {}", ns.dir().display()))?;
            if report.is_empty() {
                tracing::debug!("Nothing to reclaim in {}", ns.dir().display());
            }
            removed += report.len();
        } else {
            let summary = rotate_namespace(ns, &app_config.retention, store.as_ref())
                .with_context(|| format!("Rotation failed for {}", ns.dir().display()))?;
            removed += summary.pruned.removed.len() + summary.reclaimed.len();
        }
    }
    tracing::info!(
        "Processed {} backup directories, {} entries removed",
        namespaces.len(),
        removed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::compressor::{Codec, CompressorSelector};
    use crate::backup::layout::Tier;
    use crate::backup::placement::{BackupPlacement, LogicalTimestamp};
    use crate::backup::store::HardlinkStore;
    use crate::config::{CodecOverrides, LayoutConfig};
    use crate::utils::runas::PrivilegeRunner;
    use chrono::{NaiveDate, NaiveTime};
    use std::fs;
    use tempfile::TempDir;

    fn count(ns: &BackupNamespace, tier: Tier) -> usize {
        fs::read_dir(ns.tier_dir(tier)).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_one_month_of_daily_runs() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let work = tmp.path().join("work");
        fs::create_dir_all(&work)?;
        let layout = DirectoryLayout::from_config(&LayoutConfig {
            top_backup_dir: tmp.path().join("pgbackups"),
            backup_dir: None,
            backup_type: "postgresql".to_string(),
            host: None,
            connection_host: None,
        });
        let policy = RetentionPolicy {
            keep_days: Some(9),
            keep_weeks: Some(3),
            keep_months: Some(1),
            ..RetentionPolicy::default()
        };
        let runner = PrivilegeRunner::new(None);
        let compressor =
            CompressorSelector::from_env().compressor(Codec::NoComp, &CodecOverrides::default(), &runner)?;
        let placement = BackupPlacement::new(&policy, &HardlinkStore, "sql");

        let ns = layout.namespace("WITH QUOTES é utf8")?;
        layout.ensure_namespace_dirs(&ns, &policy)?;
        for day in 1..=31 {
            let dump = work.join("dump.sql");
            fs::write(&dump, format!("day {}", day))?;
            let ts = LogicalTimestamp::new(
                NaiveDate::from_ymd_opt(2002, 1, day).unwrap(),
                NaiveTime::from_hms_opt(1, 1, 1),
            );
            placement.place(&ns, &dump, &ts, &compressor)?;
        }
        assert_eq!(count(&ns, Tier::Dumps), 31);
        assert_eq!(count(&ns, Tier::Daily), 31);
        // January 2002 spans ISO weeks 1 to 5
        assert_eq!(count(&ns, Tier::Weekly), 5);
        assert_eq!(count(&ns, Tier::Monthly), 1);

        let pruned = RetentionPruner::new(&policy).prune(&ns)?;
        assert_eq!(count(&ns, Tier::Daily), 9);
        assert_eq!(count(&ns, Tier::Weekly), 3);
        assert_eq!(count(&ns, Tier::Monthly), 1);
        assert_eq!(count(&ns, Tier::LastSnapshots), 2);
        assert_eq!(count(&ns, Tier::Dumps), 31);
        assert_eq!(pruned.removed.len(), 22 + 2 + 29);

        let reclaimed = OrphanReclaimer::new(&policy, &HardlinkStore).reclaim(&ns)?;
        // days 23 to 31, weekly 14 and 21, monthly 1
        assert_eq!(count(&ns, Tier::Dumps), 12);
        assert_eq!(reclaimed.masters.len(), 19);
        assert!(reclaimed.derived.is_empty());
        assert!(ns.tier_dir(Tier::Dumps).join("WITH QUOTES é utf8_2002-01-01.sql").exists());
        assert!(!ns.tier_dir(Tier::Dumps).join("WITH QUOTES é utf8_2002-01-02.sql").exists());

        let again = rotate_namespace(&ns, &policy, &HardlinkStore)?;
        assert_eq!(again, RotationSummary::default());
        Ok(())
    }

    #[test]
    fn test_same_day_rerun_reclaims_replaced_snapshot() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let work = tmp.path().join("work");
        fs::create_dir_all(&work)?;
        let layout = DirectoryLayout::from_config(&LayoutConfig {
            top_backup_dir: tmp.path().to_path_buf(),
            backup_dir: None,
            backup_type: "mysql".to_string(),
            host: Some("db1".to_string()),
            connection_host: None,
        });
        let policy = RetentionPolicy::default();
        let runner = PrivilegeRunner::new(None);
        let compressor =
            CompressorSelector::from_env().compressor(Codec::NoComp, &CodecOverrides::default(), &runner)?;
        let placement = BackupPlacement::new(&policy, &HardlinkStore, "sql");
        let ns = layout.namespace("foo")?;
        layout.ensure_namespace_dirs(&ns, &policy)?;

        for hour in [1, 2] {
            let dump = work.join("dump.sql");
            fs::write(&dump, format!("run {}", hour))?;
            let ts = LogicalTimestamp::new(
                NaiveDate::from_ymd_opt(2002, 1, 8).unwrap(),
                NaiveTime::from_hms_opt(hour, 0, 0),
            );
            placement.place(&ns, &dump, &ts, &compressor)?;
        }

        let summary = rotate_namespace(&ns, &policy, &HardlinkStore)?;

        assert!(summary.pruned.removed.is_empty());
        assert_eq!(
            summary.reclaimed.derived,
            vec![ns
                .tier_dir(Tier::LastSnapshots)
                .join("foo_2002_008_2002-01-08_01-00-00.sql")]
        );
        assert_eq!(count(&ns, Tier::LastSnapshots), 1);
        Ok(())
    }
}
