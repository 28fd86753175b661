//! File-manager collaborator.
//!
//! Generated outputs land at unique paths under a caches directory. Core code
//! only asks for paths and removes files by path; it never decides naming or
//! cleanup policy itself.

use std::path::{Path, PathBuf};

use crate::kind::MediaKind;

/// Path generation and removal for generated media files.
pub trait FileManager: Send + Sync {
    /// A fresh, unused path for an output of the given kind.
    fn unique_url(&self, kind: MediaKind) -> Option<PathBuf>;

    /// Remove the file backing an asset.
    fn remove(&self, asset_path: &Path) -> std::io::Result<()> {
        self.remove_asset(asset_path)
    }

    /// Remove a file by path.
    fn remove_asset(&self, path: &Path) -> std::io::Result<()>;
}

/// Writes outputs as `<uuid>.<ext>` under a caches directory.
#[derive(Debug, Clone)]
pub struct CachesFileManager {
    root: PathBuf,
}

impl CachesFileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileManager for CachesFileManager {
    fn unique_url(&self, kind: MediaKind) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            tracing::warn!(root = %self.root.display(), error = %e, "Caches directory unavailable");
            return None;
        }
        let name = format!("{}.{}", uuid::Uuid::new_v4(), kind.extension());
        Some(self.root.join(name))
    }

    fn remove_asset(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)?;
        tracing::debug!(path = %path.display(), "Removed asset");
        Ok(())
    }
}
