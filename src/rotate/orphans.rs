// dbrotate/src/rotate/orphans.rs
use chrono::{Datelike, NaiveDate};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::backup::layout::{BackupNamespace, Tier};
use crate::backup::store::{is_staging_name, remove_entry, ContentId, ContentStore};
use crate::config::RetentionPolicy;
use crate::errors::{Result, RotateError};
use crate::rotate::sorter::{parse_key, sort_desc, SortKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// `dumps` masters no retained tier referenced anymore.
    pub masters: Vec<PathBuf>,
    /// Derived entries whose master was gone.
    pub derived: Vec<PathBuf>,
    /// Staging files an interrupted link left behind.
    pub staging: Vec<PathBuf>,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.masters.is_empty() && self.derived.is_empty() && self.staging.is_empty()
    }

    pub fn len(&self) -> usize {
        self.masters.len() + self.derived.len() + self.staging.len()
    }
}

/// Calendar span a tier entry stands for, read from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Day(NaiveDate),
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
}

impl Span {
    fn of(tier: Tier, key: &SortKey) -> Option<Span> {
        let field = |i: usize| key.fields().get(i).copied();
        let year = i32::try_from(field(0)?).ok()?;
        let second = u32::try_from(field(1)?).ok()?;
        match tier {
            Tier::Dumps => {
                let day = u32::try_from(field(2)?).ok()?;
                NaiveDate::from_ymd_opt(year, second, day).map(Span::Day)
            }
            Tier::Daily | Tier::LastSnapshots => NaiveDate::from_yo_opt(year, second).map(Span::Day),
            Tier::Weekly => Some(Span::Week { year, week: second }),
            Tier::Monthly => Some(Span::Month { year, month: second }),
        }
    }

    fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Span::Day(day) => day == date,
            Span::Week { year, week } => {
                let iso = date.iso_week();
                iso.year() == year && iso.week() == week
            }
            Span::Month { year, month } => date.year() == year && date.month() == month,
        }
    }
}

/// A datable tier entry with the identity of its content.
struct Artifact {
    path: PathBuf,
    span: Span,
    id: ContentId,
}

impl Artifact {
    /// Whether this derived entry references `master`: same content, taken within its span.
    fn references(&self, master: &Artifact) -> bool {
        let Span::Day(date) = master.span else {
            return false;
        };
        self.id == master.id && self.span.contains(date)
    }
}

/// Restores the master/derived invariant of a namespace after pruning.
pub struct OrphanReclaimer<'a> {
    policy: &'a RetentionPolicy,
    store: &'a dyn ContentStore,
}

impl<'a> OrphanReclaimer<'a> {
    pub fn new(policy: &'a RetentionPolicy, store: &'a dyn ContentStore) -> Self {
        OrphanReclaimer { policy, store }
    }

    /// Removes unreferenced masters first, then derived entries left without a master,
    /// then leftover staging files.
    ///
    /// A derived entry references a master when both hold the same content and the
    /// master's date falls in the entry's period. Running it again right away removes
    /// nothing.
    pub fn reclaim(&self, ns: &BackupNamespace) -> Result<ReclaimReport> {
        let mut report = ReclaimReport::default();
        let dumps = ns.tier_dir(Tier::Dumps);

        let enabled = self.policy.enabled_derived();
        if !enabled.is_empty() {
            let mut referencing = Vec::new();
            for tier in enabled {
                referencing.extend(self.artifacts(&ns.tier_dir(tier), tier)?);
            }
            for master in self.artifacts(&dumps, Tier::Dumps)? {
                if !referencing.iter().any(|entry| entry.references(&master))
                    && remove_entry(&master.path)?
                {
                    tracing::info!("Pruning {}", master.path.display());
                    report.masters.push(master.path);
                }
            }
        }

        let masters = self.artifacts(&dumps, Tier::Dumps)?;
        for tier in Tier::DERIVED {
            for entry in self.artifacts(&ns.tier_dir(tier), tier)? {
                if !masters.iter().any(|master| entry.references(master))
                    && remove_entry(&entry.path)?
                {
                    tracing::info!("Pruning {}", entry.path.display());
                    report.derived.push(entry.path);
                }
            }
        }

        for tier in Tier::ALL {
            for staging in staging_files(&ns.tier_dir(tier))? {
                if remove_entry(&staging)? {
                    tracing::info!("Pruning {}", staging.display());
                    report.staging.push(staging);
                }
            }
        }
        Ok(report)
    }

    /// Datable entries of `dir` with their span and content identity.
    /// Entries gone since listing are skipped.
    fn artifacts(&self, dir: &Path, tier: Tier) -> Result<Vec<Artifact>> {
        let mut found = Vec::new();
        for name in sort_desc(tier, dir)? {
            let Some(span) = parse_key(tier, &name).and_then(|key| Span::of(tier, &key)) else {
                tracing::warn!("Ignoring {} entry with an impossible date: {}", tier, name);
                continue;
            };
            let path = dir.join(name);
            match self.store.content_id(&path) {
                Ok(id) => found.push(Artifact { path, span, id }),
                Err(RotateError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }
}

/// Hidden staging files directly in `dir`. A missing directory yields nothing.
fn staging_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) => continue,
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                return Err(RotateError::io(path, e.into()));
            }
        };
        if entry.file_type().is_file() && is_staging_name(entry.file_name()) {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}
