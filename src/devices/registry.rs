//! Registry of known devices

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::types::{CommandRecord, DeviceState, DeviceUpdate};
use crate::protocol::CommandAck;

/// Commands kept per device before the oldest are dropped
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Registry of every device seen since startup
///
/// Entries are created on first upsert and never removed.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceState>,
    history_limit: usize,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a registry that keeps at most `limit` commands per device
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            devices: HashMap::new(),
            history_limit: limit.max(1),
        }
    }

    /// Get a device by ID
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&DeviceState> {
        self.devices.get(device_id)
    }

    /// List all known devices
    #[must_use]
    pub fn list(&self) -> Vec<&DeviceState> {
        self.devices.values().collect()
    }

    /// Merge `update` into the device's entry, creating it if needed
    pub fn upsert(&mut self, device_id: &str, update: DeviceUpdate) -> &DeviceState {
        let state = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceState::new(device_id));
        update.apply(state);
        state
    }

    /// Append a sent command to the device's history, evicting the oldest
    ///
    /// Returns false if the device is unknown
    pub fn record_command(&mut self, device_id: &str, record: CommandRecord) -> bool {
        let Some(state) = self.devices.get_mut(device_id) else {
            return false;
        };
        state.command_history.push_back(record);
        while state.command_history.len() > self.history_limit {
            state.command_history.pop_front();
        }
        true
    }

    /// Attach an acknowledgment to the matching history entry
    ///
    /// Returns false if the device or the entry is not found (e.g. already evicted)
    pub fn record_ack(&mut self, device_id: &str, ack: &CommandAck, acked_at: DateTime<Utc>) -> bool {
        let Some(entry) = self.devices.get_mut(device_id).and_then(|state| {
            state
                .command_history
                .iter_mut()
                .find(|record| record.cmd_id == ack.cmd_id)
        }) else {
            return false;
        };
        entry.ack = Some(ack.clone());
        entry.acked_at = Some(acked_at);
        true
    }

    /// Number of known devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
