// dbrotate/src/rotate/pruner.rs
use std::path::PathBuf;

use crate::backup::layout::{BackupNamespace, Tier};
use crate::backup::store::remove_entry;
use crate::config::RetentionPolicy;
use crate::errors::Result;
use crate::rotate::sorter::sort_desc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
}

/// Applies per-tier keep-counts by age.
pub struct RetentionPruner<'a> {
    policy: &'a RetentionPolicy,
}

impl<'a> RetentionPruner<'a> {
    pub fn new(policy: &'a RetentionPolicy) -> Self {
        RetentionPruner { policy }
    }

    /// Keeps the newest `keep_count` entries of every tier of `ns` and removes the rest.
    ///
    /// Only directory entries are removed; content shared with another tier survives.
    pub fn prune(&self, ns: &BackupNamespace) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        for tier in Tier::ALL {
            let Some(keep) = self.policy.keep_count(tier) else {
                continue;
            };
            let dir = ns.tier_dir(tier);
            for name in sort_desc(tier, &dir)?.into_iter().skip(keep) {
                let path = dir.join(name);
                if remove_entry(&path)? {
                    tracing::info!("Pruning {}", path.display());
                    report.removed.push(path);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::layout::DirectoryLayout;
    use crate::config::LayoutConfig;
    use std::fs;
    use tempfile::TempDir;

    fn namespace(tmp: &TempDir) -> anyhow::Result<(DirectoryLayout, BackupNamespace)> {
        let layout = DirectoryLayout::from_config(&LayoutConfig {
            top_backup_dir: tmp.path().to_path_buf(),
            backup_dir: None,
            backup_type: "postgresql".to_string(),
            host: None,
            connection_host: None,
        });
        let ns = layout.namespace("foo")?;
        Ok((layout, ns))
    }

    fn touch_weeks(ns: &BackupNamespace, weeks: std::ops::RangeInclusive<u32>) -> anyhow::Result<()> {
        for week in weeks {
            fs::write(ns.tier_dir(Tier::Weekly).join(format!("foo_2002_{}.sql", week)), b"")?;
        }
        Ok(())
    }

    #[test]
    fn test_prunes_oldest_beyond_keep_count() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let (layout, ns) = namespace(&tmp)?;
        let policy = RetentionPolicy {
            keep_weeks: Some(3),
            ..RetentionPolicy::default()
        };
        layout.ensure_namespace_dirs(&ns, &policy)?;
        touch_weeks(&ns, 1..=10)?;

        let report = RetentionPruner::new(&policy).prune(&ns)?;

        let weekly = ns.tier_dir(Tier::Weekly);
        assert_eq!(report.removed.len(), 7);
        assert_eq!(report.removed[0], weekly.join("foo_2002_7.sql"));
        assert_eq!(
            sort_desc(Tier::Weekly, &weekly)?,
            vec!["foo_2002_10.sql", "foo_2002_9.sql", "foo_2002_8.sql"]
        );
        Ok(())
    }

    #[test]
    fn test_nothing_pruned_within_keep_count() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let (layout, ns) = namespace(&tmp)?;
        let policy = RetentionPolicy {
            keep_weeks: Some(3),
            ..RetentionPolicy::default()
        };
        layout.ensure_namespace_dirs(&ns, &policy)?;
        touch_weeks(&ns, 1..=3)?;

        assert!(RetentionPruner::new(&policy).prune(&ns)?.removed.is_empty());
        assert_eq!(fs::read_dir(ns.tier_dir(Tier::Weekly))?.count(), 3);
        Ok(())
    }

    #[test]
    fn test_dumps_are_unbounded_without_keep_count() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let (layout, ns) = namespace(&tmp)?;
        let mut policy = RetentionPolicy::default();
        layout.ensure_namespace_dirs(&ns, &policy)?;
        for day in 1..=20 {
            fs::write(ns.tier_dir(Tier::Dumps).join(format!("foo_2002-01-{:02}.sql", day)), b"")?;
        }

        RetentionPruner::new(&policy).prune(&ns)?;
        assert_eq!(fs::read_dir(ns.tier_dir(Tier::Dumps))?.count(), 20);

        policy.keep_dumps = Some(5);
        let report = RetentionPruner::new(&policy).prune(&ns)?;
        assert_eq!(report.removed.len(), 15);
        assert!(ns.tier_dir(Tier::Dumps).join("foo_2002-01-20.sql").exists());
        assert!(!ns.tier_dir(Tier::Dumps).join("foo_2002-01-15.sql").exists());
        Ok(())
    }

    #[test]
    fn test_missing_tier_directories_contribute_nothing() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let (_, ns) = namespace(&tmp)?;
        let report = RetentionPruner::new(&RetentionPolicy::default()).prune(&ns)?;
        assert!(report.removed.is_empty());
        Ok(())
    }
}
