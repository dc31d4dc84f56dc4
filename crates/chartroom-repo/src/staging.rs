//! Ephemeral credential files
//!
//! Credentials pulled from the cluster are written to uniquely named
//! temporary files so an HTTP client can pick them up by path. All files
//! written during one operation are tracked by a [`StagedFiles`] guard which
//! disposes of them when dropped: deleted when cleanup is enabled, left on
//! disk and logged otherwise.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

/// Write `data` to a new uniquely named file
///
/// `pattern` follows the `prefix-*` convention: everything before the `*`
/// becomes the file name prefix, a random suffix replaces the `*`.
pub fn stage(data: &[u8], pattern: &str, dir: Option<&Path>) -> Result<PathBuf> {
    let (prefix, suffix) = pattern.split_once('*').unwrap_or((pattern, ""));
    let write_failed = |e: std::io::Error| RepoError::EphemeralWriteFailed {
        pattern: pattern.to_string(),
        message: e.to_string(),
    };

    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(suffix);
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(write_failed)?;

    file.write_all(data).map_err(write_failed)?;
    file.flush().map_err(write_failed)?;

    let (_, path) = file.keep().map_err(|e| write_failed(e.error))?;
    Ok(path)
}

/// Files staged during one logical operation
#[derive(Debug)]
pub struct StagedFiles {
    paths: Vec<PathBuf>,
    cleanup: bool,
    dir: Option<PathBuf>,
}

impl StagedFiles {
    /// New scope; `cleanup` decides whether files are deleted on drop
    pub fn new(cleanup: bool) -> Self {
        Self {
            paths: Vec::new(),
            cleanup,
            dir: None,
        }
    }

    /// Stage files under `dir` instead of the system temp directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Stage `data` and track the resulting file
    pub fn stage(&mut self, data: &[u8], pattern: &str) -> Result<PathBuf> {
        let path = stage(data, pattern, self.dir.as_deref())?;
        tracing::debug!(path = %path.display(), "staged credential file");
        self.paths.push(path.clone());
        Ok(path)
    }

    /// Paths staged so far
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn cleanup_enabled(&self) -> bool {
        self.cleanup
    }

    /// Dispose of every tracked file now
    ///
    /// Deletion failures are logged and otherwise ignored. Returns the paths
    /// that were handled.
    pub fn cleanup_all(&mut self) -> Vec<PathBuf> {
        let paths = std::mem::take(&mut self.paths);
        if paths.is_empty() {
            return paths;
        }

        if self.cleanup {
            for path in &paths {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove staged file");
                }
            }
        } else {
            for path in &paths {
                tracing::info!(path = %path.display(), "cleanup disabled, keeping staged file");
            }
        }
        paths
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        self.cleanup_all();
    }
}
