// dbrotate/src/utils/runas.rs
//! Runs shell command lines as the database service principal.

use std::ffi::{CStr, CString};
use std::os::unix::fs::chown;
use std::path::Path;
use std::process::{Command, Output};
use std::ptr;

use crate::errors::{Result, RotateError};
use crate::utils::find_executable;

const PW_BUF_LEN: usize = 16 * 1024;

/// Executes command lines as `principal`, or as the invoking user when none is set.
///
/// The command line is handed to `/bin/sh -c` as one argument and never re-split,
/// so quoting done by the caller reaches the shell untouched.
#[derive(Debug, Clone, Default)]
pub struct PrivilegeRunner {
    principal: Option<String>,
}

impl PrivilegeRunner {
    pub fn new(principal: Option<String>) -> Self {
        PrivilegeRunner {
            principal: principal.filter(|p| !p.is_empty()),
        }
    }

    /// Runs `command` and returns its stdout.
    pub fn run(&self, command: &str) -> Result<String> {
        let output = self
            .build(command)?
            .output()
            .map_err(|e| RotateError::io("/bin/sh", e))?;
        check_output(output)
    }

    /// Gives `path` to the principal when commands run under a switched identity,
    /// so they can write what the invoking root user created.
    pub fn hand_over(&self, path: &Path) -> Result<()> {
        let Some(principal) = self.switched_principal() else {
            return Ok(());
        };
        // Without root the switch itself is refused by `run`.
        if !is_root() {
            return Ok(());
        }
        let Some((uid, gid)) = lookup_user(principal) else {
            return Err(RotateError::Permission {
                principal: principal.to_string(),
                reason: "no such user".to_string(),
            });
        };
        chown(path, Some(uid), Some(gid)).map_err(|e| RotateError::io(path, e))
    }

    fn switched_principal(&self) -> Option<&str> {
        self.principal
            .as_deref()
            .filter(|principal| current_user().as_deref() != Some(*principal))
    }

    fn build(&self, command: &str) -> Result<Command> {
        let Some(principal) = self.switched_principal() else {
            return Ok(shell(command));
        };

        let denied = |reason: &str| RotateError::Permission {
            principal: principal.to_string(),
            reason: reason.to_string(),
        };
        if !user_exists(principal) {
            return Err(denied("no such user"));
        }
        if !is_root() {
            return Err(denied("switching identity requires root"));
        }
        let su = find_executable("su", None).ok_or_else(|| denied("su not found in PATH"))?;

        let mut cmd = Command::new(su);
        cmd.args(["-s", "/bin/sh", "-c"])
            .arg(command)
            .arg("--")
            .arg(principal);
        Ok(cmd)
    }
}

fn shell(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

fn check_output(output: Output) -> Result<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        return Err(RotateError::Command {
            status: output.status.to_string(),
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(stdout)
}

/// Quotes `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Login name of the effective user.
pub fn current_user() -> Option<String> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; PW_BUF_LEN];
    let mut result: *mut libc::passwd = ptr::null_mut();
    let ret = unsafe {
        libc::getpwuid_r(
            libc::geteuid(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if ret != 0 || result.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    Some(name.to_string_lossy().into_owned())
}

pub fn user_exists(name: &str) -> bool {
    lookup_user(name).is_some()
}

/// Uid and primary gid of `name`.
fn lookup_user(name: &str) -> Option<(libc::uid_t, libc::gid_t)> {
    let c_name = CString::new(name).ok()?;
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; PW_BUF_LEN];
    let mut result: *mut libc::passwd = ptr::null_mut();
    let ret = unsafe {
        libc::getpwnam_r(
            c_name.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };
    if ret != 0 || result.is_null() {
        return None;
    }
    Some((pwd.pw_uid, pwd.pw_gid))
}
