//! Table of commands awaiting an acknowledgment

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::CommandError;
use crate::protocol::CommandAck;

/// Outcome delivered to whoever issued a command
pub type CommandResult = Result<CommandAck, CommandError>;

/// An issued command awaiting acknowledgment, timeout, or cancellation
#[derive(Debug)]
pub struct PendingCommand {
    pub cmd_id: String,
    pub device_id: String,
    pub action: String,
    pub sent_at: DateTime<Utc>,
    responder: oneshot::Sender<CommandResult>,
    deadline: Option<AbortHandle>,
}

impl PendingCommand {
    /// Create a pending entry, returning the receiver its result will arrive on
    #[must_use]
    pub fn new(
        cmd_id: impl Into<String>,
        device_id: impl Into<String>,
        action: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<CommandResult>) {
        let (responder, rx) = oneshot::channel();
        let pending = Self {
            cmd_id: cmd_id.into(),
            device_id: device_id.into(),
            action: action.into(),
            sent_at,
            responder,
            deadline: None,
        };
        (pending, rx)
    }

    /// Attach the deadline timer, aborted when the entry settles early
    #[must_use]
    pub fn with_deadline(mut self, deadline: AbortHandle) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn settle(self, result: CommandResult) {
        if let Some(deadline) = self.deadline {
            deadline.abort();
        }
        // The caller may have stopped waiting
        let _ = self.responder.send(result);
    }
}

/// Pending commands keyed by command id, across all devices
#[derive(Debug, Default)]
pub struct PendingTable {
    commands: HashMap<String, PendingCommand>,
}

impl PendingTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a command id is currently pending
    #[must_use]
    pub fn contains(&self, cmd_id: &str) -> bool {
        self.commands.contains_key(cmd_id)
    }

    /// Track a newly issued command
    ///
    /// An entry with the same id is replaced and rejected; callers generate ids
    /// that avoid this.
    pub fn insert(&mut self, pending: PendingCommand) {
        let cmd_id = pending.cmd_id.clone();
        if let Some(previous) = self.commands.insert(cmd_id.clone(), pending) {
            tracing::warn!(cmd_id = %cmd_id, "pending command id reused");
            previous.settle(Err(CommandError::Transport(format!(
                "command id {cmd_id} reused"
            ))));
        }
    }

    /// Fulfill the command matching `ack.cmd_id`
    ///
    /// Returns the id of the device the command was issued to, or `None` if
    /// no such command is pending (late or unknown ack)
    pub fn resolve(&mut self, ack: &CommandAck) -> Option<String> {
        let mut pending = self.commands.remove(&ack.cmd_id)?;
        let device_id = std::mem::take(&mut pending.device_id);
        pending.settle(Ok(ack.clone()));
        Some(device_id)
    }

    /// Reject a command with `reason`
    ///
    /// Returns false if the command already settled
    pub fn cancel(&mut self, cmd_id: &str, reason: CommandError) -> bool {
        let Some(pending) = self.commands.remove(cmd_id) else {
            return false;
        };
        pending.settle(Err(reason));
        true
    }

    /// Reject a command whose deadline fired
    ///
    /// Called from the deadline task itself, so the timer is not aborted.
    /// Returns false if the command already settled.
    pub fn expire(&mut self, cmd_id: &str) -> bool {
        let Some(mut pending) = self.commands.remove(cmd_id) else {
            return false;
        };
        pending.deadline = None;
        let reason = CommandError::CommandTimeout {
            device_id: pending.device_id.clone(),
            cmd_id: pending.cmd_id.clone(),
        };
        pending.settle(Err(reason));
        true
    }

    /// Reject every command owned by `device_id` with `DeviceDisconnected`
    ///
    /// Returns the number of commands cancelled
    pub fn cancel_device(&mut self, device_id: &str) -> usize {
        let ids: Vec<String> = self
            .commands
            .values()
            .filter(|p| p.device_id == device_id)
            .map(|p| p.cmd_id.clone())
            .collect();

        for cmd_id in &ids {
            let reason = CommandError::DeviceDisconnected {
                device_id: device_id.to_string(),
                cmd_id: cmd_id.clone(),
            };
            self.cancel(cmd_id, reason);
        }

        ids.len()
    }

    /// Number of pending commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(cmd_id: &str) -> CommandAck {
        CommandAck {
            device_id: "d1".to_string(),
            cmd_id: cmd_id.to_string(),
            success: true,
            error: None,
            data: serde_json::Map::new(),
        }
    }

    fn pending(cmd_id: &str, device_id: &str) -> (PendingCommand, oneshot::Receiver<CommandResult>) {
        PendingCommand::new(cmd_id, device_id, "dispense", Utc::now())
    }

    #[test]
    fn resolve_round_trip() {
        let mut table = PendingTable::new();
        let (cmd, mut rx) = pending("c1", "d1");
        table.insert(cmd);
        assert!(table.contains("c1"));

        assert_eq!(table.resolve(&ack("c1")).as_deref(), Some("d1"));
        assert!(table.is_empty());

        let received = rx.try_recv().unwrap().unwrap();
        assert_eq!(received.cmd_id, "c1");
    }

    #[test]
    fn late_ack_is_noop() {
        let mut table = PendingTable::new();
        let (cmd, mut rx) = pending("c1", "d1");
        table.insert(cmd);

        assert!(table.expire("c1"));
        assert!(table.resolve(&ack("c1")).is_none());
        assert!(!table.expire("c1"));

        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CommandError::CommandTimeout { .. })
        ));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut table = PendingTable::new();
        let (cmd, mut rx) = pending("c1", "d1");
        table.insert(cmd);

        let reason = CommandError::Transport("shutting down".to_string());
        assert!(table.cancel("c1", reason.clone()));
        assert!(!table.cancel("c1", reason.clone()));
        assert_eq!(rx.try_recv().unwrap(), Err(reason));
    }

    #[test]
    fn cancel_device_only_touches_that_device() {
        let mut table = PendingTable::new();
        let mut d1_receivers = Vec::new();
        for i in 0..3 {
            let (cmd, rx) = pending(&format!("a{i}"), "d1");
            table.insert(cmd);
            d1_receivers.push(rx);
        }
        let (other, mut other_rx) = pending("b0", "d2");
        table.insert(other);

        assert_eq!(table.cancel_device("d1"), 3);
        assert_eq!(table.len(), 1);
        assert_eq!(table.cancel_device("d1"), 0);

        for mut rx in d1_receivers {
            assert!(matches!(
                rx.try_recv().unwrap(),
                Err(CommandError::DeviceDisconnected { .. })
            ));
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn dropped_caller_does_not_panic() {
        let mut table = PendingTable::new();
        let (cmd, rx) = pending("c1", "d1");
        table.insert(cmd);
        drop(rx);

        assert!(table.resolve(&ack("c1")).is_some());
    }

    #[tokio::test]
    async fn settle_aborts_deadline() {
        let mut table = PendingTable::new();
        let (cmd, _rx) = pending("c1", "d1");
        let timer = tokio::spawn(std::future::pending::<()>());
        table.insert(cmd.with_deadline(timer.abort_handle()));

        assert!(table.resolve(&ack("c1")).is_some());
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
