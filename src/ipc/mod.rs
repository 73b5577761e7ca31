//! IPC endpoint layout shared by the frontend, sandbox, and security proxy.
//!
//! Every endpoint is a Unix socket (or the verdict mmap file) under the
//! user's home directory. Each server process owns and binds exactly one
//! listener; clients are short-lived connections.

pub mod oob;
pub mod wire;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Frontend-facing backend endpoint; the proxy binds this so the frontend
/// believes it is talking to the backend directly.
pub const PUBLIC_BACKEND_SOCKET: &str = ".awesh.sock";
/// The real backend listener the proxy dials.
pub const REAL_BACKEND_SOCKET: &str = ".awesh_backend.sock";
/// Sandbox validator listener.
pub const SANDBOX_SOCKET: &str = ".awesh_sandbox.sock";
/// Frontend's listener for out-of-band proxy messages.
pub const FRONTEND_SOCKET: &str = ".awesh_frontend.sock";
/// Shared verdict region written by the sandbox, read by the frontend.
pub const VERDICT_SHM_FILE: &str = "/tmp/awesh_sandbox_output.mmap";

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub backend_public: PathBuf,
    pub backend_real: PathBuf,
    pub sandbox: PathBuf,
    pub frontend: PathBuf,
    pub verdict_shm: PathBuf,
}

impl Endpoints {
    /// Resolve the default endpoint set under `$HOME`.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("HOME is not set")?;
        Ok(Self::rooted_at(&home))
    }

    /// Endpoint set rooted at an arbitrary directory (tests use temp dirs).
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            backend_public: dir.join(PUBLIC_BACKEND_SOCKET),
            backend_real: dir.join(REAL_BACKEND_SOCKET),
            sandbox: dir.join(SANDBOX_SOCKET),
            frontend: dir.join(FRONTEND_SOCKET),
            verdict_shm: if dirs::home_dir().is_some_and(|home| home == dir) {
                PathBuf::from(VERDICT_SHM_FILE)
            } else {
                dir.join("awesh_sandbox_output.mmap")
            },
        }
    }

    /// Remove every socket path and the shared-memory file, ignoring
    /// errors. Called at frontend shutdown and for stale cleanup.
    pub fn remove_all(&self) {
        for path in [
            &self.backend_public,
            &self.backend_real,
            &self.sandbox,
            &self.frontend,
            &self.verdict_shm,
        ] {
            let _ = fs::remove_file(path);
        }
    }
}

/// Unlink a stale socket file before binding a fresh listener on it.
pub fn unlink_stale(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_endpoints_share_the_root() {
        let endpoints = Endpoints::rooted_at(Path::new("/tmp/awesh-test"));
        assert_eq!(
            endpoints.backend_public,
            PathBuf::from("/tmp/awesh-test/.awesh.sock")
        );
        assert_eq!(
            endpoints.sandbox,
            PathBuf::from("/tmp/awesh-test/.awesh_sandbox.sock")
        );
        assert_eq!(
            endpoints.verdict_shm,
            PathBuf::from("/tmp/awesh-test/awesh_sandbox_output.mmap")
        );
    }

    #[test]
    fn remove_all_ignores_missing_files() {
        let endpoints = Endpoints::rooted_at(Path::new("/tmp/awesh-test-missing"));
        endpoints.remove_all();
    }
}
