// dbrotate/src/backup/placement.rs
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::backup::compressor::Compressor;
use crate::backup::layout::{BackupNamespace, Tier};
use crate::backup::store::{remove_entry, ContentId, ContentStore};
use crate::config::RetentionPolicy;
use crate::errors::{Result, RotateError};
use crate::rotate::sorter::{parse_key, sort_desc};

/// Calendar identity of one backup run.
///
/// The time of day, when known, tells apart several runs on the same day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalTimestamp {
    date: NaiveDate,
    time: Option<NaiveTime>,
}

impl LogicalTimestamp {
    pub fn new(date: NaiveDate, time: Option<NaiveTime>) -> Self {
        LogicalTimestamp { date, time }
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        LogicalTimestamp::new(datetime.date(), Some(datetime.time()))
    }

    pub fn now() -> Self {
        LogicalTimestamp::from_datetime(Local::now().naive_local())
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn weekday(&self) -> Weekday {
        self.date.weekday()
    }

    /// `YYYY-MM-DD`
    pub fn full_date(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `HH-MM-SS`, when the time of day is known.
    pub fn disambiguator(&self) -> Option<String> {
        self.time.map(|t| {
            format!("{:02}-{:02}-{:02}", t.hour(), t.minute(), t.second())
        })
    }
}

/// File name of the artifact taken at `ts` inside `tier`.
///
/// `ext` is the full extension without the leading dot, e.g. `sql.xz`.
pub fn entry_name(tier: Tier, database: &str, ts: &LogicalTimestamp, ext: &str) -> String {
    let date = ts.date();
    let stem = match tier {
        Tier::Dumps => format!("{}_{}", database, ts.full_date()),
        Tier::Daily => format!(
            "{}_{}_{:03}_{}",
            database,
            date.year(),
            date.ordinal(),
            ts.full_date()
        ),
        Tier::LastSnapshots => {
            let mut stem = format!(
                "{}_{}_{:03}_{}",
                database,
                date.year(),
                date.ordinal(),
                ts.full_date()
            );
            if let Some(time) = ts.disambiguator() {
                stem.push('_');
                stem.push_str(&time);
            }
            stem
        }
        Tier::Weekly => {
            let week = date.iso_week();
            format!("{}_{}_{}", database, week.year(), week.week())
        }
        Tier::Monthly => format!("{}_{}_{:02}", database, date.year(), date.month()),
    };
    if ext.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, ext)
    }
}

/// Outcome of a complete placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedArtifact {
    pub master: PathBuf,
    pub entries: Vec<(Tier, PathBuf)>,
}

/// Stores a finished dump as the `dumps` master and fans it out to the derived tiers.
pub struct BackupPlacement<'a> {
    policy: &'a RetentionPolicy,
    store: &'a dyn ContentStore,
    dump_extension: &'a str,
}

impl<'a> BackupPlacement<'a> {
    pub fn new(policy: &'a RetentionPolicy, store: &'a dyn ContentStore, dump_extension: &'a str) -> Self {
        BackupPlacement {
            policy,
            store,
            dump_extension,
        }
    }

    /// Places `dump` taken at `ts` into `ns`.
    ///
    /// Fails hard when the master cannot be stored. When the master is stored but some
    /// tier references are missing, returns `PartialFanout`; the next orphan pass
    /// restores consistency.
    ///
    /// Entries of the same period are matched by their datable stem, so an earlier
    /// run stored under another codec is replaced rather than kept beside.
    pub fn place(
        &self,
        ns: &BackupNamespace,
        dump: &Path,
        ts: &LogicalTimestamp,
        compressor: &Compressor<'_>,
    ) -> Result<PlacedArtifact> {
        let codec = compressor.codec();
        let dumps_dir = ns.tier_dir(Tier::Dumps);
        let staged_name = entry_name(Tier::Dumps, &ns.database, ts, self.dump_extension);
        let staged = dumps_dir.join(&staged_name);

        // Masters an earlier run of the same day left behind, whatever their codec.
        let superseded = same_period(Tier::Dumps, &dumps_dir, &staged_name)?;
        let previous: Vec<ContentId> = superseded
            .iter()
            .filter_map(|path| self.identity_of(path))
            .collect();

        move_into_place(dump, &staged)?;
        let master = compressor.compress(&staged)?;
        for old in superseded.iter().filter(|path| **path != master) {
            if remove_entry(old)? {
                tracing::info!("Replacing {} with {}", old.display(), master.display());
            }
        }

        let ext = match codec.extension() {
            Some(codec_ext) => format!("{}.{}", self.dump_extension, codec_ext),
            None => self.dump_extension.to_string(),
        };

        let mut entries = Vec::new();
        let mut missing = Vec::new();
        for tier in self.policy.enabled_derived() {
            let dir = ns.tier_dir(tier);
            let name = entry_name(tier, &ns.database, ts, &ext);
            let entry = dir.join(&name);
            let siblings = match same_period(tier, &dir, &name) {
                Ok(siblings) => siblings,
                Err(e) => {
                    tracing::error!("Could not list {} entries in {}: {}", tier, dir.display(), e);
                    missing.push(tier);
                    continue;
                }
            };
            if !self.qualifies(tier, ts, &siblings, &previous) {
                continue;
            }
            if let Err(e) = self.store.link(&master, &entry) {
                tracing::error!("Could not add {} entry {}: {}", tier, entry.display(), e);
                missing.push(tier);
                continue;
            }
            for stale in siblings.iter().filter(|path| **path != entry) {
                if let Err(e) = remove_entry(stale) {
                    tracing::warn!("Could not remove replaced entry {}: {}", stale.display(), e);
                }
            }
            entries.push((tier, entry));
        }

        if !missing.is_empty() {
            return Err(RotateError::PartialFanout { master, missing });
        }
        Ok(PlacedArtifact { master, entries })
    }

    /// Whether the run at `ts` gets an entry in `tier`, given the entries of its period.
    fn qualifies(
        &self,
        tier: Tier,
        ts: &LogicalTimestamp,
        siblings: &[PathBuf],
        previous: &[ContentId],
    ) -> bool {
        let representative = |boundary: bool| {
            if !boundary {
                return false;
            }
            // First run of the period wins, unless its content was just replaced.
            siblings.is_empty()
                || siblings
                    .iter()
                    .filter_map(|path| self.identity_of(path))
                    .any(|id| previous.contains(&id))
        };
        match tier {
            Tier::Dumps => false,
            Tier::Daily | Tier::LastSnapshots => true,
            Tier::Weekly => {
                representative(self.policy.weekly_day.map_or(true, |day| ts.weekday() == day))
            }
            Tier::Monthly => {
                representative(self.policy.monthly_day.map_or(true, |day| ts.date().day() == day))
            }
        }
    }

    fn identity_of(&self, path: &Path) -> Option<ContentId> {
        if !path.exists() {
            return None;
        }
        self.store.content_id(path).ok()
    }
}

/// Entries of `dir` whose sort key equals the one of `name`, under any extension.
fn same_period(tier: Tier, dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
    let Some(key) = parse_key(tier, name) else {
        return Ok(Vec::new());
    };
    Ok(sort_desc(tier, dir)?
        .into_iter()
        .filter(|candidate| parse_key(tier, candidate).as_ref() == Some(&key))
        .map(|candidate| dir.join(candidate))
        .collect())
}

/// Moves `from` to `to`, falling back to copy + remove across filesystems.
fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RotateError::io(from, e)),
        Err(_) => {
            fs::copy(from, to).map_err(|e| RotateError::io(to, e))?;
            fs::remove_file(from).map_err(|e| RotateError::io(from, e))
        }
    }
}
