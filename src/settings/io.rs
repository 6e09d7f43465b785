// src/settings/io.rs
use directories_next::ProjectDirs;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::{EngineSettings, SettingsError};

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "BlockDB";
const APPLICATION: &str = "blockdb";
const CONFIG_FILE: &str = "engine_settings.json";

pub fn get_config_path() -> Result<PathBuf, SettingsError> {
    let proj_dirs =
        ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION).ok_or(SettingsError::NoConfigDir)?;
    Ok(proj_dirs.config_dir().join(CONFIG_FILE))
}

/// Reads settings from `path`; a missing file yields defaults.
pub fn load_settings_from(path: &Path) -> Result<EngineSettings, SettingsError> {
    match fs::File::open(path) {
        Ok(file) => {
            let settings: EngineSettings = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                error!("EngineSettings: Failed to parse settings file {:?}: {}", path, e);
                e
            })?;
            info!("EngineSettings: Loaded settings from {:?}", path);
            Ok(settings)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("EngineSettings: No settings file at {:?}, using defaults", path);
            Ok(EngineSettings::default())
        }
        Err(e) => {
            error!("EngineSettings: Failed to open settings file {:?}: {}", path, e);
            Err(e.into())
        }
    }
}

pub fn save_settings_to(path: &Path, settings: &EngineSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), settings)?;
    info!("EngineSettings: Saved settings to {:?}", path);
    Ok(())
}

/// Settings file from the platform config dir (or `explicit`), then a `.env`
/// file if present, then `BLOCKDB_*` environment overrides.
pub fn load_settings(explicit: Option<&Path>) -> Result<EngineSettings, SettingsError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => get_config_path()?,
    };
    let mut settings = load_settings_from(&path)?;
    if let Ok(env_file) = dotenvy::dotenv() {
        info!("EngineSettings: Loaded environment from {:?}", env_file);
    }
    settings.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default_and_save_round_trips() {
        let dir = std::env::temp_dir().join(format!("blockdb-settings-{}", uuid::Uuid::new_v4()));
        let path = dir.join(CONFIG_FILE);
        assert_eq!(load_settings_from(&path).unwrap(), EngineSettings::default());

        let mut settings = EngineSettings::default();
        settings.max_query_limit = 250;
        save_settings_to(&path, &settings).unwrap();
        assert_eq!(load_settings_from(&path).unwrap().max_query_limit, 250);

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_from(&path), Err(SettingsError::Parse(_))));
        let _ = fs::remove_dir_all(&dir);
    }
}
