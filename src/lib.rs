//! Dispenser Gateway - WebSocket gateway for ball-dispensing machines
//!
//! This library provides the core functionality for the dispenser gateway:
//! - Device registry built from the status reports devices push
//! - Command issuance with acknowledgment correlation and deadlines
//! - Per-connection session handling for the device WebSocket
//! - REST API for operators and the kiosk web app
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Clients                          │
//! │   Web UI  │  Kiosk  │  curl  │  ...                  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ REST
//! ┌────────────────────▼────────────────────────────────┐
//! │                Dispenser Gateway                     │
//! │   Registry  │  Pending Commands  │  Sessions         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ WebSocket (/ws)
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Devices                          │
//! │   ESP32 dispensers  │  mock fleet                    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod commands;
pub mod config;
pub mod devices;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod session;

pub use commands::{CommandResult, CommandSettings};
pub use config::Config;
pub use devices::{CommandRecord, DeviceConnection, DeviceRegistry, DeviceState};
pub use error::{CommandError, Error, ProtocolError, Result};
pub use gateway::Gateway;
pub use protocol::{CommandAck, CommandAction, DeviceEvent, DeviceMessage, StatusReport};
pub use session::{DeviceSession, SessionState};
