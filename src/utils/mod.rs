pub mod logging;
pub mod runas;

use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use which::which_in;

/// Finds `binary` on `search_path`, or on the current `PATH` when none is given.
pub fn find_executable(binary: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let path_var = match search_path {
        Some(paths) => paths.to_os_string(),
        None => std::env::var_os("PATH")?,
    };
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    which_in(binary, Some(path_var), cwd).ok()
}

/// True when `path` is a regular file with at least one execute bit.
pub fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
