use vpk_manager_core::fs_paths::AppPaths;
use vpk_manager_core::models::settings::AppSettings;

pub fn load_settings(paths: &dyn AppPaths) -> AppSettings {
    let path = paths.settings_path();
    let data = match std::fs::read_to_string(&path) {
        Ok(d) => d,
        Err(_) => return AppSettings::default(),
    };

    match serde_json::from_str::<AppSettings>(&data) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("[config] ignoring unreadable {}: {}", path.display(), e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(paths: &dyn AppPaths, settings: &AppSettings) -> anyhow::Result<()> {
    let path = paths.settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(settings)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, &path)?;
    tracing::debug!("[config] saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vpk_manager_core::fs_paths::FixedPaths;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = load_settings(&FixedPaths(tmp.path().to_path_buf()));
        assert_eq!(settings.root_dir, None);
        assert_eq!(settings.download.max_attempts, 3);
    }

    #[test]
    fn saved_settings_load_back() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = FixedPaths(tmp.path().join("nested"));
        let mut settings = AppSettings::default();
        settings.root_dir = Some(PathBuf::from("/games/l4d2/addons"));
        settings.download.max_attempts = 5;

        save_settings(&paths, &settings).unwrap();
        let loaded = load_settings(&paths);
        assert_eq!(loaded.root_dir, settings.root_dir);
        assert_eq!(loaded.download.max_attempts, 5);
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = FixedPaths(tmp.path().to_path_buf());
        std::fs::write(paths.settings_path(), "{not json").unwrap();
        assert_eq!(load_settings(&paths).root_dir, None);
    }
}
