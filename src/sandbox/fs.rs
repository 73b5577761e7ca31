//! Sandbox root construction: a read-only bind mount of `/` with a symlink
//! fallback for unprivileged runs.
//!
//! The fallback does not provide read-only semantics; it only reproduces
//! enough of the filesystem for command validation. Callers log the weaker
//! mode so the degradation is visible.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

pub const DEFAULT_ROOT: &str = "/tmp/awesh_sandbox_root";

const ESSENTIAL_DIRS: &[&str] = &["/bin", "/usr", "/lib", "/lib64", "/etc", "/opt", "/sbin"];
const WRITABLE_STUBS: &[&str] = &["/tmp", "/var", "/home"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// `/` bind-mounted read-only onto the sandbox root.
    ReadOnlyBind,
    /// Symlinked essential directories plus writable stubs.
    SymlinkFallback,
}

pub fn default_root() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT)
}

/// Build the sandbox root, preferring the read-only bind mount.
pub fn setup_root(root: &Path) -> Result<RootKind> {
    fs::create_dir_all(root)
        .with_context(|| format!("creating sandbox root {}", root.display()))?;

    if bind_mount_readonly(root).is_ok() {
        return Ok(RootKind::ReadOnlyBind);
    }

    for dir in ESSENTIAL_DIRS {
        let target = join_rooted(root, dir);
        if !target.exists() {
            let _ = std::os::unix::fs::symlink(dir, &target);
        }
    }
    for dir in WRITABLE_STUBS {
        let _ = fs::create_dir_all(join_rooted(root, dir));
    }
    Ok(RootKind::SymlinkFallback)
}

fn bind_mount_readonly(root: &Path) -> io::Result<()> {
    let source = CString::new("/").expect("static path");
    let target = CString::new(root.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "root path contains NUL"))?;
    // SAFETY: source/target are valid NUL-terminated paths; a NULL fstype and
    // data are permitted for MS_BIND mounts.
    let rc = unsafe {
        libc::mount(
            source.as_ptr(),
            target.as_ptr(),
            std::ptr::null(),
            libc::MS_BIND | libc::MS_RDONLY,
            std::ptr::null(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Best-effort teardown: unmount, then remove the root tree.
pub fn cleanup_root(root: &Path) {
    if let Ok(target) = CString::new(root.as_os_str().as_bytes()) {
        // SAFETY: target is a valid NUL-terminated path; failure is ignored
        // (the root may never have been mounted).
        unsafe {
            libc::umount(target.as_ptr());
        }
    }
    let _ = fs::remove_dir_all(root);
}

fn join_rooted(root: &Path, absolute: &str) -> PathBuf {
    root.join(absolute.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after epoch")
            .as_nanos();
        env::temp_dir().join(format!("awesh-root-{tag}-{nanos}"))
    }

    #[test]
    fn join_rooted_strips_the_leading_slash() {
        assert_eq!(
            join_rooted(Path::new("/tmp/r"), "/usr"),
            PathBuf::from("/tmp/r/usr")
        );
    }

    #[test]
    fn setup_builds_some_root_and_cleanup_removes_it() {
        let root = unique_root("setup");
        let kind = setup_root(&root).expect("setup root");
        assert!(root.exists());
        if kind == RootKind::SymlinkFallback {
            // Unprivileged path: stubs exist, essentials are links.
            assert!(root.join("tmp").is_dir());
        }
        cleanup_root(&root);
        assert!(!root.exists());
    }
}
