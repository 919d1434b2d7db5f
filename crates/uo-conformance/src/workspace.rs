use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;

const SCRATCH_PREFIX: &str = "uo-scratch-";

#[derive(Debug, Error)]
#[error("failed to {action} {}: {source}", .path.display())]
pub struct FilesystemError {
    pub action: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FilesystemError {
    pub(crate) fn at<'a>(
        action: &'static str,
        path: &'a Path,
    ) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Per-fixture scratch directory. Removed when dropped, including during
/// unwinding, unless [`ScratchWorkspace::retain`] is called.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    pub fn create() -> Result<Self, FilesystemError> {
        Self::create_in(None)
    }

    /// Create under `parent`, or under the system temp directory.
    pub fn create_in(parent: Option<&Path>) -> Result<Self, FilesystemError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match parent {
            Some(parent) => builder
                .tempdir_in(parent)
                .map_err(FilesystemError::at("create scratch workspace in", parent))?,
            None => {
                let base = std::env::temp_dir();
                builder
                    .tempdir()
                    .map_err(FilesystemError::at("create scratch workspace in", &base))?
            }
        };
        tracing::debug!(path = %dir.path().display(), "created scratch workspace");
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Keep the directory on disk and hand back its path.
    #[must_use]
    pub fn retain(self) -> PathBuf {
        self.dir.keep()
    }
}

/// Recursively copy `source` into `destination`, merging into existing
/// directories and overwriting files on name collision. Symlinks are
/// followed. Returns the number of files copied.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<usize, FilesystemError> {
    fs::create_dir_all(destination).map_err(FilesystemError::at("create", destination))?;

    let mut copied = 0;
    for entry in fs::read_dir(source).map_err(FilesystemError::at("read", source))? {
        let entry = entry.map_err(FilesystemError::at("read", source))?;
        let from = entry.path();
        let to = destination.join(entry.file_name());
        let metadata = fs::metadata(&from).map_err(FilesystemError::at("stat", &from))?;
        if metadata.is_dir() {
            copied += copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(FilesystemError::at("copy", &from))?;
            copied += 1;
        }
    }
    Ok(copied)
}
