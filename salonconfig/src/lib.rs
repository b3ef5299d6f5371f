//! # SalonTV Configuration Module
//!
//! Configuration management for SalonTV:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use salonconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let root = config.get_media_root();
//! ```

use anyhow::{Result, anyhow};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("salontv.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load SalonTV configuration"));
}

const ENV_CONFIG_DIR: &str = "SALONTV_CONFIG";
const ENV_PREFIX: &str = "SALONTV_CONFIG__";

const DEFAULT_HTTP_PORT: u16 = 3000;
const DEFAULT_PLAYER_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_BROWSER_DEBUG_PORT: u16 = 10000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Returns the global configuration singleton.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Macro to generate a getter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.is_empty() => s,
                _ => $default.to_string(),
            }
        }
    };
}

/// Macro to generate a getter for u16 values with default
macro_rules! impl_u16_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u16 {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().map(|v| v as u16).unwrap_or($default),
                _ => $default,
            }
        }
    };
}

/// Configuration manager for SalonTV
///
/// Holds the merged YAML tree (embedded defaults, then the external
/// `config.yaml`, then `SALONTV_CONFIG__...` environment overrides) and
/// exposes typed getters on top of it.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(".salontv").exists() {
            return ".salontv".to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            return home.join(".salontv").to_string_lossy().to_string();
        }

        ".salontv".to_string()
    }

    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(anyhow!("Le chemin de configuration n'est pas un répertoire"));
        }
        Ok(())
    }

    /// Loads the configuration from the specified directory
    ///
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&config_dir))?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        Ok(Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        })
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path (in memory only)
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key, value);
            } else {
                let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();
                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let key_path = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    impl_u16_config!(get_http_port, &["host", "http_port"], DEFAULT_HTTP_PORT);
    impl_u16_config!(
        get_browser_debug_port,
        &["browser", "debug_port"],
        DEFAULT_BROWSER_DEBUG_PORT
    );
    impl_string_config!(
        get_player_base_url,
        &["player", "base_url"],
        DEFAULT_PLAYER_BASE_URL
    );
    impl_string_config!(get_player_password, &["player", "password"], "salon");
    impl_string_config!(get_player_executable, &["player", "executable"], "vlc");
    impl_string_config!(get_browser_executable, &["browser", "executable"], "firefox");
    impl_string_config!(
        get_browser_watch_url,
        &["browser", "watch_url"],
        "https://www.youtube.com/watch?v="
    );
    impl_string_config!(
        get_browser_search_api_key,
        &["browser", "search_api_key"],
        ""
    );
    impl_string_config!(get_log_level, &["log", "level"], DEFAULT_LOG_LEVEL);

    /// Root directory of the media library.
    ///
    /// Falls back to `~/media` when unconfigured so a fresh install has a
    /// sensible listing target.
    pub fn get_media_root(&self) -> String {
        match self.get_value(&["media", "root"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => home_dir()
                .map(|h| h.join("media").to_string_lossy().to_string())
                .unwrap_or_else(|| "/media".to_string()),
        }
    }

    /// Polling cadence of the status pollers, in milliseconds.
    pub fn get_poll_interval_ms(&self) -> u64 {
        match self.get_value(&["poll", "interval_ms"]) {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            _ => DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn get_log_enable_console(&self) -> bool {
        matches!(self.get_value(&["log", "enable_console"]), Ok(Value::Bool(true)) | Err(_))
    }

    /// Path of the durable view-progress file, inside the config directory.
    pub fn get_progress_path(&self) -> PathBuf {
        Path::new(&self.config_dir).join("view-progress.json")
    }

    /// The configuration directory itself (created at load time).
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }
}

/// Merges `other` into `base`, recursively for mappings.
fn merge_yaml(base: &mut Value, other: &Value) {
    match (base, other) {
        (Value::Mapping(base_map), Value::Mapping(other_map)) => {
            for (k, v) in other_map {
                match base_map.get_mut(k) {
                    Some(base_v) => merge_yaml(base_v, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base, other) => {
            *base = other.clone();
        }
    }
}
