//! Run-scoped extraction directory
//!
//! Every run starts from an empty directory: a leftover tree from a crashed
//! run is deleted, never merged, so its files cannot be loaded twice. The
//! directory stays flat and holds only the run's CSV files and the rendered
//! load script.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the rendered load script inside the workspace.
pub const LOAD_SCRIPT_NAME: &str = "load_plan.sql";

/// Extension of extracted data files.
pub const EXTRACTED_EXTENSION: &str = "csv";

/// Reject workspace paths that name no directory of their own
///
/// The workspace is deleted recursively on reset, so `.`, `..` and `/` are
/// refused outright.
pub fn validate_root(path: &Path) -> Result<()> {
    if path.file_name().is_none() {
        return Err(IngestError::config(format!(
            "workspace path '{}' must name a dedicated directory",
            path.display()
        )));
    }
    Ok(())
}

/// A data file unpacked from one attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub source_attachment_id: String,
    pub disk_path: PathBuf,
    pub extracted_at: DateTime<Utc>,
}

/// The run's extraction directory and the files unpacked into it
#[derive(Debug)]
pub struct ExtractionWorkspace {
    root: PathBuf,
    contents: Vec<ExtractedFile>,
}

impl ExtractionWorkspace {
    /// Create `path`, wiping whatever a previous run left there
    pub fn create_or_reset(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        validate_root(&root)?;

        match fs::symlink_metadata(&root) {
            Ok(meta) => {
                warn!(path = %root.display(), "Leftover extraction dir detected, destroying it");
                let removed = if meta.is_dir() {
                    fs::remove_dir_all(&root)
                } else {
                    fs::remove_file(&root)
                };
                removed.map_err(|e| IngestError::io(&root, e))?;
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => return Err(IngestError::io(&root, e)),
        }

        fs::create_dir_all(&root).map_err(|e| IngestError::io(&root, e))?;
        info!(path = %root.display(), "Extraction workspace ready");

        Ok(Self {
            root,
            contents: Vec::new(),
        })
    }

    /// Reopen the workspace a previous run left behind, without resetting it
    ///
    /// Used to retry a failed load against files that were already extracted.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        validate_root(&root)?;
        let meta = fs::metadata(&root).map_err(|e| IngestError::io(&root, e))?;
        if !meta.is_dir() {
            return Err(IngestError::io(
                &root,
                std::io::Error::new(ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        Ok(Self {
            root,
            contents: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files extracted during this run, in extraction order
    pub fn contents(&self) -> &[ExtractedFile] {
        &self.contents
    }

    /// Where the rendered load script is written
    pub fn script_path(&self) -> PathBuf {
        self.root.join(LOAD_SCRIPT_NAME)
    }

    /// CSV files currently in the workspace, sorted by file name
    ///
    /// Reads the directory rather than `contents` so the load sees exactly
    /// what is on disk.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root).map_err(|e| IngestError::io(&self.root, e))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| IngestError::io(&self.root, e))?;
            let file_type = entry.file_type().map_err(|e| IngestError::io(entry.path(), e))?;
            let path = entry.path();

            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(EXTRACTED_EXTENSION));
            if file_type.is_file() && is_csv {
                files.push(path);
            }
        }

        files.sort();
        debug!(count = files.len(), "Listed workspace files");
        Ok(files)
    }

    pub(crate) fn register(&mut self, file: ExtractedFile) {
        self.contents.push(file);
    }
}
