// # Rule Set File
//
// Durable copy of the live NAT rule set, so restored redirects survive a
// reboot.
//
// ## Write Strategy
//
// - Atomic writes: content goes to `<path>.tmp`, then is renamed over `<path>`
// - Backup: the previous file is copied to `<path>.backup` before the rename
// - Parent directories are created on first write
//
// The file is opaque text (whatever the backend's save produced, e.g.
// `iptables-save` output). Nothing here parses it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;

/// Atomically written rule set file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSetFile {
    path: PathBuf,
}

impl RuleSetFile {
    /// Create a writer for the given path (nothing is touched yet)
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file's content atomically
    pub async fn write(&self, content: &str) -> Result<(), Error> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::nat(format!(
                    "Failed to create rules directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let temp_path = Self::sibling(&self.path, "tmp");
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::nat(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(content.as_bytes()).await.map_err(|e| {
                Error::nat(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::nat(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = self.backup_path();
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to back up {}: {}", self.path.display(), e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::nat(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!("Rule set written to {}", self.path.display());
        Ok(())
    }

    /// Path of the previous version
    pub fn backup_path(&self) -> PathBuf {
        Self::sibling(&self.path, "backup")
    }

    // rules.v4 -> rules.v4.<suffix>; set_extension would clobber the "v4"
    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".");
        name.push(suffix);
        path.with_file_name(name)
    }
}
