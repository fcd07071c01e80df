use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::ManagerError;

pub const WORKSHOP_DIR: &str = "workshop";
pub const DISABLED_DIR: &str = "disabled";
pub const TEMP_DIR: &str = "temp";

/// Shared handle to the configured addons directory. Every service holds a
/// clone; setting it once is visible to all of them.
#[derive(Debug, Clone, Default)]
pub struct RootDir {
    inner: Arc<RwLock<Option<PathBuf>>>,
}

impl RootDir {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(path)),
        }
    }

    pub fn get(&self) -> Option<PathBuf> {
        self.inner.read().ok().and_then(|g| g.clone())
    }

    pub fn require(&self) -> Result<PathBuf, ManagerError> {
        self.get().ok_or(ManagerError::NoRootDir)
    }

    /// Validates and stores a new root directory.
    pub fn set(&self, path: &Path) -> Result<(), ManagerError> {
        validate_directory(path)?;
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(path.to_path_buf());
        }
        tracing::info!("[root] addons directory set to {}", path.display());
        Ok(())
    }
}

/// The directory must exist, be a directory, and accept a test write.
pub fn validate_directory(path: &Path) -> Result<(), ManagerError> {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ManagerError::DirectoryNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(ManagerError::Io(e)),
    };
    if !meta.is_dir() {
        return Err(ManagerError::NotADirectory(path.to_path_buf()));
    }

    let marker = path.join(".vpk-manager-test");
    std::fs::write(&marker, b"test").map_err(|e| ManagerError::NotWritable(e.to_string()))?;
    let _ = std::fs::remove_file(&marker);
    Ok(())
}
