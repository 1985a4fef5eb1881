//! Shared gateway state
//!
//! The device registry and the pending-command table are mutated only while
//! holding the single state lock, so registry updates, ack matching, deadline
//! expiry and disconnect sweeps never interleave.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::commands::{CommandSettings, PendingTable};
use crate::devices::{DeviceRegistry, DeviceState};

/// Everything guarded by the gateway lock
#[derive(Debug)]
pub struct GatewayState {
    pub devices: DeviceRegistry,
    pub pending: PendingTable,
}

/// Cloneable handle to one gateway instance
#[derive(Debug, Clone)]
pub struct Gateway {
    pub(crate) state: Arc<Mutex<GatewayState>>,
    pub(crate) settings: CommandSettings,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(CommandSettings::default())
    }
}

impl Gateway {
    /// Create an isolated gateway with no devices
    #[must_use]
    pub fn new(settings: CommandSettings) -> Self {
        let state = GatewayState {
            devices: DeviceRegistry::with_history_limit(settings.history_limit),
            pending: PendingTable::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            settings,
        }
    }

    /// Acquire the state lock
    pub async fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().await
    }

    /// Snapshot of every known device
    pub async fn devices(&self) -> Vec<DeviceState> {
        let state = self.lock().await;
        state.devices.list().into_iter().cloned().collect()
    }

    /// Snapshot of one device
    pub async fn device(&self, device_id: &str) -> Option<DeviceState> {
        self.lock().await.devices.get(device_id).cloned()
    }

    /// Number of commands awaiting acknowledgment
    pub async fn pending_count(&self) -> usize {
        self.lock().await.pending.len()
    }
}
