use std::path::PathBuf;

/// Errors a caller is expected to branch on. Everything else travels as
/// `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("root directory not set")]
    NoRootDir,

    #[error("directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("directory is not writable: {0}")]
    NotWritable(String),

    #[error("target already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("file is not inside the addons directory: {0}")]
    NotManaged(PathBuf),

    #[error("operation not allowed for an addon in '{0}'")]
    InvalidLocation(String),

    #[error("file does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("invalid file name: '{0}'")]
    InvalidName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
