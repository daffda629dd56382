use super::bridge;
use crate::config::BridgeConfig;
use std::path::PathBuf;
use std::sync::RwLock;
use tauri::command;

lazy_static::lazy_static! {
    static ref CONFIG_PATH: RwLock<PathBuf> = RwLock::new(BridgeConfig::default_path());
}

/// Where config commands persist the configuration.
pub fn config_path() -> PathBuf {
    CONFIG_PATH
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

pub fn set_config_path(path: PathBuf) {
    *CONFIG_PATH
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = path;
}

/// Get the current configuration
#[command]
pub async fn get_config() -> Result<BridgeConfig, String> {
    Ok(bridge().config())
}

/// Update configuration; applies to previews started afterwards
#[command]
pub async fn update_config(new_config: BridgeConfig) -> Result<(), String> {
    bridge()
        .set_config(new_config.clone())
        .map_err(|e| e.to_string())?;

    new_config
        .save_to_file(config_path())
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Reset configuration to defaults
#[command]
pub async fn reset_config() -> Result<BridgeConfig, String> {
    let default_config = BridgeConfig::default();

    bridge()
        .set_config(default_config.clone())
        .map_err(|e| format!("Failed to reset config: {}", e))?;

    default_config
        .save_to_file(config_path())
        .map_err(|e| e.to_string())?;

    Ok(default_config)
}
