//! Configuration file discovery and TOML loading
//!
//! Config path resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/lsap/config.toml`), if present
//! 4. None - caller falls back to built-in defaults

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "LSAP_CONFIG";

/// Resolve the configuration file path
///
/// Returns `None` when no CLI argument or environment variable is given and no
/// platform config file exists. A missing config file is not an error: the
/// engine runs on built-in defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// Platform default configuration file path
///
/// - Linux: `~/.config/lsap/config.toml`
/// - macOS: `~/Library/Application Support/lsap/config.toml`
/// - Windows: `%APPDATA%\lsap\config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lsap").join("config.toml"))
}

/// Load and deserialize a TOML file
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value = toml::from_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(value)
}

/// Load a TOML config if a path resolves, otherwise use defaults
///
/// An explicitly requested file that cannot be read or parsed is an error.
/// With no file at all, logs a warning and returns `T::default()`.
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => load_toml_file(path),
        None => {
            warn!("No configuration file found, using built-in defaults");
            Ok(T::default())
        }
    }
}
