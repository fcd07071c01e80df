use std::path::Path;

use anyhow::Context;
use vpk_manager_core::core::root_dir::validate_directory;
use vpk_manager_core::fs_paths::AppPaths;
use vpk_manager_core::models::settings::AppSettings;

use crate::storage::config;

pub fn get_settings(paths: &dyn AppPaths) -> AppSettings {
    config::load_settings(paths)
}

/// Applies a partial JSON document on top of the stored settings.
pub fn update_settings(paths: &dyn AppPaths, partial: &str) -> anyhow::Result<AppSettings> {
    let current = config::load_settings(paths);

    let patch: serde_json::Value = serde_json::from_str(partial).context("Invalid JSON")?;
    let mut current_val = serde_json::to_value(&current).context("Serialize")?;
    merge_json(&mut current_val, &patch);
    let updated: AppSettings = serde_json::from_value(current_val).context("Deserialize")?;

    config::save_settings(paths, &updated).context("Save")?;
    Ok(updated)
}

pub fn reset_settings(paths: &dyn AppPaths) -> anyhow::Result<AppSettings> {
    let defaults = AppSettings::default();
    config::save_settings(paths, &defaults).context("Save")?;
    Ok(defaults)
}

pub fn set_root_dir(paths: &dyn AppPaths, dir: &Path) -> anyhow::Result<AppSettings> {
    validate_directory(dir)?;
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());

    let mut current = config::load_settings(paths);
    current.root_dir = Some(dir);
    config::save_settings(paths, &current).context("Save")?;
    Ok(current)
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (Some(base_obj), Some(patch_obj)) = (base.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_obj {
            match base_obj.get_mut(key) {
                Some(existing) if value.is_object() && existing.is_object() => {
                    merge_json(existing, value)
                }
                _ => {
                    base_obj.insert(key.clone(), value.clone());
                }
            }
        }
    }
}
