// dbrotate/src/rotate/sorter.rs
//! Chronological ordering of tier entries, read from their file names only.

use regex::Regex;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::backup::layout::Tier;
use crate::errors::{Result, RotateError};

static TWO_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_(\d+)[-_](\d+)(?:\.[^_]*)?$").expect("two field pattern is valid")
});

static DATE_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_(\d+)[-_](\d+)[-_](\d+)(?:\.[^_]*)?$").expect("date pattern is valid")
});

// Years are four digits so a numeric database suffix cannot pass for one.
static DAY_OF_YEAR_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)_(\d{4})_(\d+)_(\d{4})[-_](\d+)[-_](\d+)(?:\.[^_]*)?$")
        .expect("day of year pattern is valid")
});

// Tried first, so an all-underscore time of day is not read as part of the name.
static TIMED_DAY_OF_YEAR_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(.+)_(\d{4})_(\d+)_(\d{4})[-_](\d+)[-_](\d+)",
        r"_(\d+)[-_](\d+)[-_](\d+)",
        r"(?:\.[^_]*)?$",
    ))
    .expect("timed day of year pattern is valid")
});

/// Numeric fields of an entry name, most significant first.
///
/// Shorter keys sort below longer ones sharing their prefix, so a daily
/// entry without a time of day sorts below any timed entry of that day.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey(Vec<u64>);

/// Parses the sort key of `name` under the grammar of `tier`.
pub fn parse_key(tier: Tier, name: &str) -> Option<SortKey> {
    // capture groups holding the key, in significance order
    let grammars: &[(&Regex, &[usize])] = match tier {
        Tier::Weekly | Tier::Monthly => &[(&*TWO_FIELDS, &[2, 3])],
        Tier::Dumps => &[(&*DATE_FIELDS, &[2, 3, 4])],
        Tier::Daily | Tier::LastSnapshots => &[
            (&*TIMED_DAY_OF_YEAR_FIELDS, &[2, 3, 7, 8, 9]),
            (&*DAY_OF_YEAR_FIELDS, &[2, 3]),
        ],
    };
    let (pattern, groups) = grammars.iter().find(|(pattern, _)| pattern.is_match(name))?;
    let caps = pattern.captures(name)?;
    let mut fields = Vec::with_capacity(groups.len());
    for group in groups.iter() {
        fields.push(caps.get(*group)?.as_str().parse::<u64>().ok()?);
    }
    Some(SortKey(fields))
}

impl SortKey {
    pub fn fields(&self) -> &[u64] {
        &self.0
    }
}

fn compare_desc(a: &(SortKey, String), b: &(SortKey, String)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| b.1.as_bytes().cmp(a.1.as_bytes()))
}

/// Orders `names` most recent first. Names outside the grammar of `tier` are dropped.
pub fn sort_names_desc<I>(tier: Tier, names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut keyed: Vec<(SortKey, String)> = names
        .into_iter()
        .filter_map(|name| match parse_key(tier, &name) {
            Some(key) => Some((key, name)),
            None => {
                tracing::warn!("Ignoring {} entry with undatable name: {}", tier, name);
                None
            }
        })
        .collect();
    keyed.sort_by(compare_desc);
    keyed.into_iter().map(|(_, name)| name).collect()
}

/// File names of the regular files directly in `dir`, most recent first.
///
/// Hidden names, such as in-flight staging files, are skipped. A missing
/// directory yields nothing.
pub fn sort_desc(tier: Tier, dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) => continue,
            Err(e) => {
                let path = e.path().unwrap_or(dir).to_path_buf();
                return Err(RotateError::io(path, e.into()));
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            tracing::warn!("Ignoring non UTF-8 entry {}", entry.path().display());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push(name.to_string());
    }
    Ok(sort_names_desc(tier, names))
}
