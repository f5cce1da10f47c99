// ============================================
// workspace.rs - Working folders for deployment tools and downloads
// ============================================
//
// <work_dir>/
//   OfficeODT_2013/      setup.exe + configuration.xml for 2013
//   OfficeODT_Modern/    setup.exe + configuration.xml for 2016+
//   logs/                (default log_dir)
// ============================================

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::ProductFamily;
use crate::config::Settings;
use crate::error::Error;
use crate::logging::redact_path;

const PARTIAL_EXTENSION: &str = "part";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.work_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder holding the deployment tool for one generation.
    pub fn tool_dir(&self, family: ProductFamily) -> PathBuf {
        self.root.join(format!("OfficeODT_{}", family.dir_name()))
    }

    pub fn tool_dirs(&self) -> Vec<PathBuf> {
        ProductFamily::ALL.iter().map(|f| self.tool_dir(*f)).collect()
    }

    /// Create the root and every tool folder.
    pub fn ensure(&self) -> Result<(), Error> {
        for dir in std::iter::once(self.root.clone()).chain(self.tool_dirs()) {
            fs::create_dir_all(&dir).map_err(|source| Error::Io { path: dir.clone(), source })?;
        }
        debug!(root = %redact_path(&self.root), "Workspace ready");
        Ok(())
    }

    /// Remove leftover `.part` files from interrupted downloads.
    ///
    /// Returns how many were removed. Files that can't be removed are
    /// logged and skipped.
    pub fn sweep_partial_downloads(&self) -> usize {
        let mut removed = 0;

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let is_partial = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case(PARTIAL_EXTENSION))
                .unwrap_or(false);
            if !is_partial {
                continue;
            }

            match fs::remove_file(path) {
                Ok(()) => {
                    debug!(path = %redact_path(path), "Removed partial download");
                    removed += 1;
                }
                Err(e) => warn!(path = %redact_path(path), error = %e, "Could not remove partial download"),
            }
        }

        removed
    }

    /// Delete the tool folders.
    ///
    /// Returns (removed, errors). Folders that don't exist are neither.
    pub fn clean(&self) -> (Vec<PathBuf>, Vec<String>) {
        let mut removed = Vec::new();
        let mut errors = Vec::new();

        for dir in self.tool_dirs() {
            if !dir.is_dir() {
                debug!(path = %redact_path(&dir), "Not a folder, nothing to clean");
                continue;
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!(path = %redact_path(&dir), "Folder removed");
                    removed.push(dir);
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    warn!(path = %redact_path(&dir), "Permission denied removing folder");
                    errors.push(format!("Permission denied: {}", redact_path(&dir)));
                }
                Err(e) => {
                    warn!(path = %redact_path(&dir), error = %e, "Could not remove folder");
                    errors.push(format!("{}: {}", redact_path(&dir), e));
                }
            }
        }

        (removed, errors)
    }
}
