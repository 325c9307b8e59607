//! In-memory document store.
//!
//! Documents pushed by editors live here. Reads of a path that was never
//! pushed import the real file from disk on first access, so analyzers can
//! resolve any source location named in a stack trace.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("File not found: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Snapshot of one document at the time it was opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    path: PathBuf,
    content: Arc<str>,
}

impl VirtualFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Zero-based line access.
    pub fn line(&self, index: usize) -> Option<&str> {
        self.content.lines().nth(index)
    }
}

#[derive(Debug, Default)]
pub struct VirtualFs {
    files: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite `path`.
    pub fn write_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let content: Arc<str> = Arc::from(content.into());
        debug!("vfs write {} ({} bytes)", path.display(), content.len());
        self.files.write().insert(path, content);
    }

    /// Drop `path` from memory. Returns whether it was present.
    pub fn remove(&self, path: impl AsRef<Path>) -> bool {
        self.files.write().remove(path.as_ref()).is_some()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.read().contains_key(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Open `path`, importing it from disk if it is not in memory yet.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<VirtualFile, VfsError> {
        let path = path.as_ref();
        if let Some(content) = self.files.read().get(path) {
            return Ok(VirtualFile {
                path: path.to_path_buf(),
                content: content.clone(),
            });
        }

        let bytes = fs::read(path).map_err(|source| VfsError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let imported: Arc<str> = Arc::from(String::from_utf8_lossy(&bytes).into_owned());
        debug!("vfs imported {} from disk", path.display());

        // A write that landed while we were reading wins over the disk copy.
        let content = self
            .files
            .write()
            .entry(path.to_path_buf())
            .or_insert(imported)
            .clone();
        Ok(VirtualFile {
            path: path.to_path_buf(),
            content,
        })
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<String, VfsError> {
        Ok(self.open(path)?.content().to_string())
    }
}
