//! Advisory lock on the pidfile.
//!
//! The lock, not the record, is what signals "a guardian is alive": the
//! file contents may be mid-rewrite or cleared, but the `flock` is held for
//! the guardian's whole life and vanishes with it. The lock binds to the
//! pidfile's inode, which is why the file is truncated rather than unlinked
//! everywhere (see the module docs in [`super`]).

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::io::{AsRawFd, RawFd},
    path::Path,
};

use anyhow::Context as _;

use crate::Result;

/// Exclusive advisory lock on a pidfile. Dropping the guard (or process
/// death) releases the lock.
#[derive(Debug)]
pub struct PidfileLock {
    file: File,
}

impl PidfileLock {
    /// Attempt a non-blocking exclusive lock, creating the file if missing.
    /// Returns `Ok(None)` when another process already holds the lock.
    ///
    /// Existing contents are left untouched: probes lock the file first and
    /// parse the record afterwards.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("open pidfile {} for locking", path.display()))?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(Self { file }));
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(None);
        }
        Err(err).with_context(|| format!("flock pidfile {}", path.display()))
    }
}

impl AsRawFd for PidfileLock {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
