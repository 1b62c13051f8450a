//! Scratch directory provisioning.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

/// Supplies isolated scratch directories.
///
/// Every call must return a fresh, writable, empty directory, even when the
/// same `name` is requested twice.
pub trait TempFolder: Send + Sync {
    fn new_dir(&self, name: &str) -> io::Result<PathBuf>;
}

/// A temporary root directory that hands out unique subdirectories.
///
/// The root and everything below it is removed when the `TempRoot` is
/// dropped.
#[derive(Debug)]
pub struct TempRoot {
    root: TempDir,
}

impl TempRoot {
    /// Create a root under the system temp directory.
    pub fn new() -> io::Result<Self> {
        let root = tempfile::Builder::new().prefix("tally-").tempdir()?;
        Ok(Self { root })
    }

    /// Create a root under `parent`.
    pub fn new_in(parent: impl AsRef<Path>) -> io::Result<Self> {
        let root = tempfile::Builder::new()
            .prefix("tally-")
            .tempdir_in(parent)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

impl TempFolder for TempRoot {
    fn new_dir(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid scratch directory name: {:?}", name),
            ));
        }

        let dir = self
            .root
            .path()
            .join(format!("{}-{}", name, Uuid::now_v7().simple()));
        // `create_dir` fails on an existing path, so the directory is ours and empty.
        std::fs::create_dir(&dir)?;
        Ok(dir)
    }
}
