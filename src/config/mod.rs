//! Configuration management for the dispenser gateway

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::{CommandSettings, DEFAULT_COMMAND_TIMEOUT};
use crate::devices::DEFAULT_HISTORY_LIMIT;
use crate::{Error, Result};

use file::GatewayConfigFile;

/// Default listen port, shared by devices and REST clients
pub const DEFAULT_PORT: u16 = 4444;

/// Default bind address
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/WebSocket server configuration
    pub server: ServerConfig,

    /// Command issuance configuration
    pub commands: CommandSettings,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// `bind:port` socket address string
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// With `path`, that file must exist and parse. Without it, the standard
    /// config file is used if present.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded, or a value
    /// is out of range
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::load_from(path)?,
            None => file::load_config_file(),
        };
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment value cannot be parsed or a value is
    /// out of range
    pub fn from_sources(fc: GatewayConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // The generic PORT is only consulted when DISPENSER_PORT is unset
        let port = match parse_env(&env, "DISPENSER_PORT")? {
            Some(port) => Some(port),
            None => parse_env(&env, "PORT")?,
        };

        let server = ServerConfig {
            bind: env("DISPENSER_BIND")
                .or(fc.server.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port: port.or(fc.server.port).unwrap_or(DEFAULT_PORT),
            static_dir: env("DISPENSER_STATIC_DIR")
                .map(PathBuf::from)
                .or(fc.server.static_dir),
        };

        let timeout_ms = parse_env::<u64>(&env, "DISPENSER_COMMAND_TIMEOUT_MS")?.or(fc.commands.timeout_ms);
        let timeout = timeout_ms.map_or(DEFAULT_COMMAND_TIMEOUT, Duration::from_millis);
        if timeout.is_zero() {
            return Err(Error::Config("command timeout must be greater than zero".to_string()));
        }

        let history_limit = parse_env(&env, "DISPENSER_HISTORY_LIMIT")?
            .or(fc.commands.history_limit)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);
        if history_limit == 0 {
            return Err(Error::Config("history limit must be at least 1".to_string()));
        }

        Ok(Self {
            server,
            commands: CommandSettings {
                timeout,
                history_limit,
            },
        })
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid value for {key}: {raw:?}")))
        })
        .transpose()
}
