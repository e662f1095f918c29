//! Typed error taxonomy for the mod lifecycle engine.
//!
//! Tier implementations (file ops, archive backends) swallow expected
//! failures into negative results; the scanner, backup engine and
//! orchestrator propagate these typed errors upward instead.

use std::path::PathBuf;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// Top-level error for scanner/orchestrator/backup flows.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Mod(#[from] ModError),

    #[error(transparent)]
    GameConfig(#[from] GameConfigError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Filesystem failures surfaced past the facade boundary.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to copy {src} -> {dest}")]
    CopyFailed { src: PathBuf, dest: PathBuf },

    #[error("failed to move {src} -> {dest}")]
    MoveFailed { src: PathBuf, dest: PathBuf },

    #[error("failed to delete {0}")]
    DeleteFailed(PathBuf),

    #[error("failed to write {0}")]
    WriteFailed(PathBuf),

    #[error("failed to read {0}")]
    ReadFailed(PathBuf),

    #[error("failed to create directory {0}")]
    CreateDirectoryFailed(PathBuf),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no space left while writing {0}")]
    NoSpace(PathBuf),
}

/// Access-tier and helper-channel failures.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("no access tier can reach {0}; a permission grant is required")]
    NoAccess(PathBuf),

    #[error("privileged helper channel is not connected")]
    HelperUnavailable,

    #[error("privileged helper refused the request: {0}")]
    HelperUnauthorized(String),
}

/// Archive backend failures. Wrong password, missing password and a broken
/// archive are deliberately distinct kinds.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("corrupt or unreadable archive: {0}")]
    Corrupt(PathBuf),

    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("archive is encrypted and no password was supplied: {0}")]
    PasswordRequired(PathBuf),

    #[error("wrong password for archive: {0}")]
    WrongPassword(PathBuf),

    #[error("member not found in archive: {0}")]
    MemberNotFound(String),

    #[error("failed to read archive member {member}: {reason}")]
    ExtractFailed { member: String, reason: String },
}

/// Mod lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum ModError {
    #[error("malformed mod metadata: {0}")]
    MalformedMetadata(String),

    #[error("duplicate mod record for {path} ({name})")]
    Duplicate { path: String, name: String },

    #[error("mod {0} has no payload files")]
    MissingPayload(String),

    #[error("mod {0} is missing on disk")]
    SourceMissing(String),

    #[error("failed to enable {name}: {reason}")]
    EnableFailed { name: String, reason: String },

    #[error("failed to disable {name}: {reason}")]
    DisableFailed { name: String, reason: String },

    #[error("failed to back up {0}")]
    BackupFailed(String),

    #[error("game file changed externally, restore blocked: {path}")]
    GameFileChanged { path: String },
}

/// Per-game descriptor validation failures.
#[derive(Debug, thiserror::Error)]
pub enum GameConfigError {
    #[error("malformed descriptor: {0}")]
    Malformed(String),

    #[error("game name must not be empty")]
    EmptyName,

    #[error("required field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("invalid package name: {0}")]
    InvalidPackageName(String),

    #[error("gameFilePath and modType lists must have equal length ({paths} vs {types})")]
    MismatchedLists { paths: usize, types: usize },
}

impl FileError {
    /// Classify an io error for a write-side operation on `path`.
    pub fn from_write_io(path: &std::path::Path, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::StorageFull => FileError::NoSpace(path.to_path_buf()),
            _ => FileError::WriteFailed(path.to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_error_kinds_are_distinct() {
        let required = ArchiveError::PasswordRequired(PathBuf::from("a.zip"));
        let wrong = ArchiveError::WrongPassword(PathBuf::from("a.zip"));
        let corrupt = ArchiveError::Corrupt(PathBuf::from("a.zip"));
        assert!(required.to_string().contains("no password"));
        assert!(wrong.to_string().contains("wrong password"));
        assert!(corrupt.to_string().contains("corrupt"));
    }

    #[test]
    fn io_write_errors_classify() {
        let path = std::path::Path::new("/tmp/x");
        let not_found = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            FileError::from_write_io(path, &not_found),
            FileError::NotFound(_)
        ));
    }
}
