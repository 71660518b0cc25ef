use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use log::{info, warn};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to <exe name>.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\foo.exe => F:\foo.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to esp32-car-remote.json in an os dependent standard directory, such as
// %AppData% on windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("nl", "esp32-car", "esp32-car-remote").map(|dirs| {
        dirs.config_dir().join("esp32-car-remote.json")
    })
}

/// An explicit path wins, then the portable path if that file exists, then the local path.
pub fn get_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            },
            Err(err) => {
                info!("No portable config at {}; Using local path instead. ({})", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub async fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let mut file = File::open(path).await?;

    let mut content = vec![];
    file.read_to_end(&mut content).await?;

    if content.is_empty() {
        return Ok(Config::default());
    }

    let content = str::from_utf8(&content)?;
    let config: Config = serde_json::from_str(content)?;
    Ok(config)
}

/// Reads the config file, a missing file means the defaults.
pub async fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let path = get_config_path(explicit)?;
    info!("Using config file {}", path.to_string_lossy());

    match read_config(&path).await {
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file does not exist, using defaults");
            Ok(Config::default())
        },
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;
    use tokio::fs;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("esp32-car-remote-{}-{}.json", process::id(), name))
    }

    #[test]
    fn explicit_path_wins() {
        let path = Path::new("/somewhere/else.json");
        assert_eq!(get_config_path(Some(path)).expect("path"), path.to_path_buf());
    }

    #[tokio::test]
    async fn missing_file_means_defaults() {
        let path = scratch_path("missing");
        assert_eq!(load_config(Some(path.as_path())).await.expect("defaults"), Config::default());
    }

    #[tokio::test]
    async fn reads_a_config_file() {
        let path = scratch_path("partial");
        fs::write(&path, r#"{"connectTimeoutMs": 3000, "initialSpeed": 150}"#).await.expect("write");

        let config = load_config(Some(path.as_path())).await.expect("config");
        fs::remove_file(&path).await.expect("cleanup");

        assert_eq!(config.connect_timeout_ms, 3000);
        assert_eq!(config.initial_speed, 150);
        assert_eq!(config.scan_duration_ms, Config::default().scan_duration_ms);
    }

    #[tokio::test]
    async fn empty_file_means_defaults() {
        let path = scratch_path("empty");
        fs::write(&path, "").await.expect("write");

        let config = read_config(&path).await.expect("config");
        fs::remove_file(&path).await.expect("cleanup");

        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let path = scratch_path("invalid");
        fs::write(&path, "{ not json").await.expect("write");

        let result = read_config(&path).await;
        fs::remove_file(&path).await.expect("cleanup");

        assert!(matches!(result, Err(ConfigError::JsonError { .. })));
    }
}
