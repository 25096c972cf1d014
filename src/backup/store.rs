// dbrotate/src/backup/store.rs
use sha2::{Digest, Sha256};
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::config::LinkMode;
use crate::errors::{Result, RotateError};

/// Identity of the content behind a directory entry.
///
/// Two entries share an artifact exactly when their ids are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentId {
    Inode { dev: u64, ino: u64 },
    Digest(String),
}

/// Backend that lets several tier entries reference one content blob.
pub trait ContentStore {
    /// Creates `target` as a new reference to the content of `source`.
    fn materialize(&self, source: &Path, target: &Path) -> io::Result<()>;

    fn content_id(&self, path: &Path) -> Result<ContentId>;

    /// Makes `entry` reference the content of `master`, replacing whatever `entry` held.
    ///
    /// The new reference is built under a hidden sibling name and renamed into place,
    /// so `entry` is never observed half-written.
    fn link(&self, master: &Path, entry: &Path) -> Result<()> {
        if entry.exists() && self.content_id(entry)? == self.content_id(master)? {
            return Ok(());
        }
        let staging = staging_path(entry)?;
        remove_entry(&staging)?;
        self.materialize(master, &staging)
            .map_err(|e| RotateError::io(&staging, e))?;
        fs::rename(&staging, entry).map_err(|e| {
            let _ = fs::remove_file(&staging);
            RotateError::io(entry, e)
        })
    }
}

/// Entries are hardlinks; identity is the inode.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardlinkStore;

impl ContentStore for HardlinkStore {
    fn materialize(&self, source: &Path, target: &Path) -> io::Result<()> {
        fs::hard_link(source, target)
    }

    fn content_id(&self, path: &Path) -> Result<ContentId> {
        let meta = fs::metadata(path).map_err(|e| RotateError::io(path, e))?;
        Ok(ContentId::Inode {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Entries are independent copies; identity is the SHA-256 of the content.
///
/// For storage backends without hardlinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyStore;

impl ContentStore for CopyStore {
    fn materialize(&self, source: &Path, target: &Path) -> io::Result<()> {
        fs::copy(source, target).map(|_| ())
    }

    fn content_id(&self, path: &Path) -> Result<ContentId> {
        let digest = file_digest(path).map_err(|e| RotateError::io(path, e))?;
        Ok(ContentId::Digest(digest))
    }
}

pub fn store_for(mode: LinkMode) -> Box<dyn ContentStore> {
    match mode {
        LinkMode::Hardlink => Box::new(HardlinkStore),
        LinkMode::Copy => Box::new(CopyStore),
    }
}

/// Removes one directory entry. An already missing entry is not an error.
///
/// Returns whether something was removed.
pub fn remove_entry(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RotateError::io(path, e)),
    }
}

fn staging_path(entry: &Path) -> Result<PathBuf> {
    let name = entry.file_name().ok_or_else(|| {
        RotateError::Config(format!("entry path has no file name: {}", entry.display()))
    })?;
    let mut staging_name = OsString::from(".");
    staging_name.push(name);
    staging_name.push(".tmp");
    Ok(entry.with_file_name(staging_name))
}

/// Whether `name` is a staging name built by [`ContentStore::link`].
pub fn is_staging_name(name: &OsStr) -> bool {
    name.to_str()
        .and_then(|name| name.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(".tmp"))
        .is_some_and(|inner| !inner.is_empty())
}

fn file_digest(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hardlink_entries_share_identity() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let master = tmp.path().join("master.sql");
        let entry = tmp.path().join("entry.sql");
        fs::write(&master, b"dump")?;

        let store = HardlinkStore;
        store.link(&master, &entry)?;

        assert_eq!(store.content_id(&master)?, store.content_id(&entry)?);
        assert_eq!(fs::metadata(&master)?.nlink(), 2);

        // relinking the same content is a no-op and leaves no staging file
        store.link(&master, &entry)?;
        assert_eq!(fs::metadata(&master)?.nlink(), 2);
        assert!(!tmp.path().join(".entry.sql.tmp").exists());
        assert!(is_staging_name(OsStr::new(".entry.sql.tmp")));
        assert!(!is_staging_name(OsStr::new("entry.sql.tmp")));
        assert!(!is_staging_name(OsStr::new(".tmp")));
        Ok(())
    }

    #[test]
    fn test_link_replaces_existing_entry() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let old = tmp.path().join("old.sql");
        let new = tmp.path().join("new.sql");
        let entry = tmp.path().join("entry.sql");
        fs::write(&old, b"old")?;
        fs::write(&new, b"new")?;

        let store = HardlinkStore;
        store.link(&old, &entry)?;
        store.link(&new, &entry)?;

        assert_eq!(fs::read(&entry)?, b"new");
        assert_eq!(store.content_id(&entry)?, store.content_id(&new)?);
        assert_ne!(store.content_id(&entry)?, store.content_id(&old)?);
        Ok(())
    }

    #[test]
    fn test_copy_store_identity_follows_content() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let master = tmp.path().join("master.sql");
        let entry = tmp.path().join("entry.sql");
        let other = tmp.path().join("other.sql");
        fs::write(&master, b"dump")?;
        fs::write(&other, b"another dump")?;

        let store = CopyStore;
        store.link(&master, &entry)?;

        assert_eq!(fs::metadata(&master)?.nlink(), 1);
        assert_eq!(store.content_id(&master)?, store.content_id(&entry)?);
        assert_ne!(store.content_id(&master)?, store.content_id(&other)?);
        Ok(())
    }

    #[test]
    fn test_remove_entry_is_idempotent() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("gone.sql");
        fs::write(&path, b"x")?;

        assert!(remove_entry(&path)?);
        assert!(!remove_entry(&path)?);
        Ok(())
    }
}
