use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while mirroring, watching or restoring
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error("Path too long: {}", .0.display())]
    PathTooLong(PathBuf),

    #[error("Unknown file type: {}", .0.display())]
    UnknownFileType(PathBuf),

    #[error("Expected a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Cannot backup directory inside itself: {} -> {}", source_path.display(), target_path.display())]
    TargetInsideSource {
        source_path: PathBuf,
        target_path: PathBuf,
    },

    #[error("Backup already exists: {} -> {}", source_path.display(), target_path.display())]
    DuplicateBackup {
        source_path: PathBuf,
        target_path: PathBuf,
    },

    #[error("Backup not found: {} -> {}", source_path.display(), target_path.display())]
    BackupNotFound {
        source_path: PathBuf,
        target_path: PathBuf,
    },

    #[error("Backup directory does not exist: {}", .0.display())]
    BackupMissing(PathBuf),

    #[error("Failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        source: notify::Error,
    },

    #[error("Failed to start worker: {0}")]
    WorkerSpawn(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Errors that only affect a single entry; callers skip it and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MirrorError::NotFound(_) | MirrorError::PathTooLong(_))
    }
}

/// Attach the failing operation and path to an `io::Result`.
pub trait IoResultExt<T> {
    fn at(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => MirrorError::NotFound(path.to_path_buf()),
            _ => MirrorError::Io {
                op,
                path: path.to_path_buf(),
                source,
            },
        })
    }
}
