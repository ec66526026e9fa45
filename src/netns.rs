//! Scoped network namespace handles.
//!
//! `setns(2)` changes kernel state of the calling thread only, so entering a
//! namespace is modeled as a nested scope: [`NetNs::run`] saves the current
//! namespace, switches, runs the closure, and restores the original
//! namespace no matter how the closure exits. The plugin stays on one OS
//! thread for its whole lifetime, which keeps this sound.

use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::sched::{setns, CloneFlags};

use crate::error::Error;

/// An open handle to a network namespace.
#[derive(Debug)]
pub struct NetNs {
    file: File,
    path: PathBuf,
}

impl NetNs {
    /// Opens the namespace at `path`.
    /// A missing path yields [`Error::NotExist`] so callers can tell
    /// "sandbox already gone" apart from real failures.
    pub fn open(path: &Path) -> Result<NetNs, Error> {
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotExist(format!("network namespace {} does not exist", path.display()))
            } else {
                Error::Namespace(format!(
                    "failed to open network namespace {}: {e}",
                    path.display()
                ))
            }
        })?;
        Ok(NetNs {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Opens the namespace the calling thread currently occupies.
    pub fn current() -> Result<NetNs, Error> {
        Self::open(Path::new("/proc/self/ns/net"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Runs `f` with the calling thread switched into this namespace,
    /// restoring the original namespace afterwards regardless of outcome.
    pub fn run<T>(&self, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
        let current = NetNs::current()?;
        setns(self.fd(), CloneFlags::CLONE_NEWNET).map_err(|e| {
            Error::Namespace(format!(
                "failed to enter network namespace {}: {e}",
                self.path.display()
            ))
        })?;
        let result = f();
        // The thread must not keep running in the target namespace; a failed
        // restore poisons every later operation of this invocation.
        setns(current.fd(), CloneFlags::CLONE_NEWNET).map_err(|e| {
            Error::Namespace(format!("failed to restore host network namespace: {e}"))
        })?;
        result
    }
}
