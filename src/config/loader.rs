//! Settings file loader and serialization.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::BuildSettings;
use crate::error::ConfigError;

/// Get the global settings path: ~/.config/gki-builder/settings.toml
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;

    Ok(home.join(".config/gki-builder").join("settings.toml"))
}

/// Load settings from a TOML file.
pub fn load_settings_from_file(path: &Path) -> Result<BuildSettings, ConfigError> {
    validate_settings_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!("Settings file not found at: {}", path.display()))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::InvalidToml(e.to_string()))
}

/// Save settings to a TOML file, creating the parent directory.
pub fn save_settings_to_file(settings: &BuildSettings, path: &Path) -> Result<(), ConfigError> {
    validate_settings_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let content =
        toml::to_string_pretty(settings).map_err(|e| ConfigError::InvalidToml(e.to_string()))?;
    fs::write(path, content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Load settings from `explicit` if given, otherwise from the global path.
///
/// An explicitly named file must exist; a missing global file yields defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<BuildSettings, ConfigError> {
    if let Some(path) = explicit {
        log::info!("[Config] Loading settings from {}", path.display());
        return load_settings_from_file(path);
    }

    match get_global_settings_path() {
        Ok(path) if path.exists() => {
            log::info!("[Config] Loading settings from {}", path.display());
            load_settings_from_file(&path)
        }
        _ => {
            log::info!("[Config] No settings file, using built-in defaults");
            Ok(BuildSettings::default())
        }
    }
}

/// Validate settings path (.toml extension required).
pub fn validate_settings_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Settings path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "toml" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Settings file must have .toml extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Settings file must have .toml extension".to_string(),
        )),
    }
}
