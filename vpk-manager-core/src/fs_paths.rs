use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "VPK_MANAGER_DATA_DIR";
const APP_DIR: &str = "vpk-manager";
const SETTINGS_FILE: &str = "settings.json";

pub trait AppPaths: Send + Sync {
    fn data_dir(&self) -> PathBuf;

    fn settings_path(&self) -> PathBuf {
        self.data_dir().join(SETTINGS_FILE)
    }
}

pub struct DesktopPaths;

impl AppPaths for DesktopPaths {
    fn data_dir(&self) -> PathBuf {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Fixed location, for tests and portable installs.
pub struct FixedPaths(pub PathBuf);

impl AppPaths for FixedPaths {
    fn data_dir(&self) -> PathBuf {
        self.0.clone()
    }
}
