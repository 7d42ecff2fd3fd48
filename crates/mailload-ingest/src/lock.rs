//! Single-run guard
//!
//! Two runs sharing a workspace would wipe each other's files, so a run holds
//! an exclusive lock file next to the workspace (`<workspace>.lock`) for its
//! whole duration. The file records the owner's pid and start time. It is
//! removed when the [`RunLock`] is dropped; a crash leaves it behind and the
//! next run refuses to start until an operator removes it.

use crate::error::{IngestError, Result};
use crate::workspace::validate_root;
use chrono::Utc;
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive ownership of a workspace for the duration of a run
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Lock file path for `workspace_dir`
    pub fn lock_path(workspace_dir: &Path) -> PathBuf {
        // Rebuild from components so a trailing separator does not turn
        // `extract/` into `extract/.lock`
        let normalized: PathBuf = workspace_dir
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();

        let mut name = normalized
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("workspace"));
        name.push(".lock");
        normalized.with_file_name(name)
    }

    pub fn acquire(workspace_dir: impl AsRef<Path>) -> Result<Self> {
        validate_root(workspace_dir.as_ref())?;
        let path = Self::lock_path(workspace_dir.as_ref());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(IngestError::RunInProgress(path));
            },
            Err(e) => return Err(IngestError::io(&path, e)),
        };

        let owner = format!("pid={}\nstarted_at={}\n", std::process::id(), Utc::now().to_rfc3339());
        if let Err(e) = file.write_all(owner.as_bytes()) {
            let _ = std::fs::remove_file(&path);
            return Err(IngestError::io(&path, e));
        }

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Run lock released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove run lock"),
        }
    }
}
