//! TOML configuration file loading
//!
//! Supports `~/.config/dispenser/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfigFile {
    /// HTTP/WebSocket server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Command issuance configuration
    #[serde(default)]
    pub commands: CommandsFileConfig,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerFileConfig {
    /// Address to bind (e.g. "0.0.0.0")
    pub bind: Option<String>,

    /// Port for both the device WebSocket and the REST API
    pub port: Option<u16>,

    /// Directory holding the built web UI
    pub static_dir: Option<PathBuf>,
}

/// Command configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsFileConfig {
    /// Acknowledgment deadline in milliseconds
    pub timeout_ms: Option<u64>,

    /// Commands kept per device
    pub history_limit: Option<usize>,
}

/// Load an explicitly requested config file
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_from(path: &Path) -> Result<GatewayConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `GatewayConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> GatewayConfigFile {
    let Some(path) = config_file_path() else {
        return GatewayConfigFile::default();
    };

    if !path.exists() {
        return GatewayConfigFile::default();
    }

    match load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            GatewayConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/dispenser/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("dispenser").join("config.toml"))
}
