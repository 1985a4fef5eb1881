//! Error types for the dispenser gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while starting or running the gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP/WebSocket server error
    #[error("server error: {0}")]
    Server(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Caller-facing failures of a command sent to a device
///
/// Device-side business failures (an empty hopper, an unknown action) are not
/// represented here: they arrive as ordinary acknowledgments with `success: false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// No device with this id has ever reported
    #[error("device_not_found")]
    DeviceNotFound(String),

    /// Device is known but has no live connection
    #[error("device_offline")]
    DeviceOffline(String),

    /// The device did not acknowledge before the deadline
    #[error("command_timeout")]
    CommandTimeout { device_id: String, cmd_id: String },

    /// The device connection closed while the command was in flight
    #[error("device_disconnected")]
    DeviceDisconnected { device_id: String, cmd_id: String },

    /// The completion channel was dropped without a result
    #[error("transport error: {0}")]
    Transport(String),
}

impl CommandError {
    /// Stable machine-readable code, as reported to REST clients
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "device_not_found",
            Self::DeviceOffline(_) => "device_offline",
            Self::CommandTimeout { .. } => "command_timeout",
            Self::DeviceDisconnected { .. } => "device_disconnected",
            Self::Transport(_) => "transport_error",
        }
    }
}

/// Errors decoding an inbound device frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// JSON object without a string `type` field
    #[error("message has no type")]
    MissingType,

    /// Known message type whose payload does not match its schema
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
