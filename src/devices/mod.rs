//! Device registry
//!
//! Devices are dispensing machines that identify themselves over a persistent
//! WebSocket connection. The registry keeps their latest state for the lifetime
//! of the process.

pub mod registry;
pub mod types;

pub use registry::{DEFAULT_HISTORY_LIMIT, DeviceRegistry};
pub use types::{CommandRecord, DeviceConnection, DeviceState, DeviceUpdate};
