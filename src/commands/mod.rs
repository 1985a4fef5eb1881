//! Command correlation
//!
//! Commands are written to a device's connection and tracked by a short id
//! until the matching `cmd_ack` arrives, the deadline fires, or the device
//! disconnects. Exactly one of those settles each command.

pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, oneshot};
use tokio::task::AbortHandle;
use uuid::Uuid;

pub use pending::{CommandResult, PendingCommand, PendingTable};

use crate::devices::{CommandRecord, DEFAULT_HISTORY_LIMIT};
use crate::error::CommandError;
use crate::gateway::{Gateway, GatewayState};
use crate::protocol::{CommandAction, GatewayMessage};

/// How long a device has to acknowledge a command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Length of generated command ids
const CMD_ID_LEN: usize = 8;

/// Command issuance settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSettings {
    /// Deadline for each command's acknowledgment
    pub timeout: Duration,
    /// Commands kept in each device's history
    pub history_limit: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Gateway {
    /// Send `action` to a device and wait for its acknowledgment
    ///
    /// A device-side failure (e.g. an empty hopper) is an `Ok` ack with
    /// `success: false`.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if the device never reported
    /// - `DeviceOffline` if it has no live connection
    /// - `CommandTimeout` if no ack arrives before the deadline
    /// - `DeviceDisconnected` if the connection closes first
    pub async fn send_command(&self, device_id: &str, action: CommandAction) -> CommandResult {
        let rx = self.dispatch(device_id, &action).await?;
        rx.await.unwrap_or_else(|_| {
            Err(CommandError::Transport(
                "command dropped before completion".to_string(),
            ))
        })
    }

    /// Write `action` to the device and register it as pending
    ///
    /// Returns the receiver the command's outcome will be delivered on.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` or `DeviceOffline` before anything is sent or
    /// any timer is armed
    pub async fn dispatch(
        &self,
        device_id: &str,
        action: &CommandAction,
    ) -> Result<oneshot::Receiver<CommandResult>, CommandError> {
        let mut guard = self.lock().await;
        let state = &mut *guard;

        let device = state
            .devices
            .get(device_id)
            .ok_or_else(|| CommandError::DeviceNotFound(device_id.to_string()))?;
        let connection = device
            .connection
            .clone()
            .filter(|_| device.is_reachable())
            .ok_or_else(|| CommandError::DeviceOffline(device_id.to_string()))?;

        let cmd_id = generate_cmd_id(&state.pending);
        let frame = GatewayMessage::command(&cmd_id, action)
            .and_then(|message| message.to_json())
            .map_err(|e| CommandError::Transport(e.to_string()))?;

        let sent_at = Utc::now();
        let (pending, rx) = PendingCommand::new(&cmd_id, device_id, action.name(), sent_at);
        let deadline = arm_deadline(
            Arc::clone(&self.state),
            cmd_id.clone(),
            self.settings.timeout,
        );
        state.pending.insert(pending.with_deadline(deadline));

        if !connection.send(frame) {
            state
                .pending
                .cancel(&cmd_id, CommandError::DeviceOffline(device_id.to_string()));
            tracing::warn!(device_id = %device_id, cmd_id = %cmd_id, "device connection closed before send");
            return Err(CommandError::DeviceOffline(device_id.to_string()));
        }

        state
            .devices
            .record_command(device_id, CommandRecord::sent(&cmd_id, action.name(), sent_at));

        tracing::debug!(
            device_id = %device_id,
            cmd_id = %cmd_id,
            action = action.name(),
            "command sent"
        );

        Ok(rx)
    }
}

/// Spawn the deadline timer for `cmd_id`
///
/// Expiry of a command that already settled is a no-op.
fn arm_deadline(state: Arc<Mutex<GatewayState>>, cmd_id: String, timeout: Duration) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let mut state = state.lock().await;
        if state.pending.expire(&cmd_id) {
            tracing::warn!(cmd_id = %cmd_id, timeout = ?timeout, "command timed out");
        }
    })
    .abort_handle()
}

/// Short random id not colliding with any pending command
fn generate_cmd_id(pending: &PendingTable) -> String {
    loop {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(CMD_ID_LEN);
        if !pending.contains(&id) {
            return id;
        }
    }
}
