//! Host-local run lock
//!
//! The NAT table is host-global. Two runs overlapping between suspension and
//! restoration would each snapshot the other's half-suspended state, so a
//! run can hold a lock file for its whole duration.
//!
//! The lock is a file created with create-new semantics and removed on drop.
//! A crash leaves it behind; the error message names the holder's pid so an
//! operator can clear a stale lock.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::Error;

/// Exclusive lock file, released on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail with [`Error::Locked`]
    pub fn acquire(path: &Path) -> Result<Self, Error> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                tracing::debug!("Acquired run lock {}", path.display());
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                Err(Error::Locked(format!(
                    "{} exists (pid {}); remove it if no other run is active",
                    path.display(),
                    holder.trim()
                )))
            }
            Err(e) => Err(Error::Network(e)),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}
