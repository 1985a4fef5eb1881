//! Per-connection lifecycle handling
//!
//! A connection starts unidentified and binds to the device id carried by its
//! first status report. Identity is taken on faith; a second connection
//! reporting the same id takes over the device entry.

use chrono::Utc;

use crate::devices::{DeviceConnection, DeviceUpdate};
use crate::error::ProtocolError;
use crate::gateway::Gateway;
use crate::protocol::{CommandAck, DeviceEvent, DeviceMessage, StatusReport};

/// Identification state of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No status report received yet
    Unidentified,
    /// Bound to a device for the rest of the connection's life
    Identified { device_id: String },
}

/// Handler for one device connection
#[derive(Debug)]
pub struct DeviceSession {
    gateway: Gateway,
    connection: DeviceConnection,
    state: SessionState,
}

impl DeviceSession {
    /// Start handling a freshly opened connection
    #[must_use]
    pub fn open(gateway: Gateway, connection: DeviceConnection) -> Self {
        tracing::info!(connection_id = %connection.id(), "device connection opened, awaiting identification");
        Self {
            gateway,
            connection,
            state: SessionState::Unidentified,
        }
    }

    /// Current identification state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Device this connection is bound to, if identified
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Identified { device_id } => Some(device_id),
            SessionState::Unidentified => None,
        }
    }

    /// Handle one inbound text frame
    ///
    /// Malformed frames are logged and dropped; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) {
        let message = match DeviceMessage::parse(text) {
            Ok(message) => message,
            Err(ProtocolError::Malformed(e)) => {
                tracing::error!(connection_id = %self.connection.id(), error = %e, raw = %text, "invalid JSON from device");
                return;
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection.id(), error = %e, "dropping device message");
                return;
            }
        };

        match message {
            DeviceMessage::Status(status) => self.on_status(status).await,
            DeviceMessage::CmdAck(ack) => self.on_ack(&ack).await,
            DeviceMessage::Event(event) => self.on_event(event),
            DeviceMessage::Unknown(kind) => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    device_id = ?self.device_id(),
                    kind = %kind,
                    "unknown message type"
                );
            }
        }
    }

    async fn on_status(&mut self, status: StatusReport) {
        if self.state == SessionState::Unidentified {
            tracing::info!(
                connection_id = %self.connection.id(),
                device_id = %status.device_id,
                "device identified"
            );
            self.state = SessionState::Identified {
                device_id: status.device_id.clone(),
            };
        }

        let device_id = status.device_id.clone();
        let update = DeviceUpdate::status(status, self.connection.clone());
        self.gateway.lock().await.devices.upsert(&device_id, update);
    }

    async fn on_ack(&self, ack: &CommandAck) {
        tracing::info!(
            device_id = %ack.device_id,
            cmd_id = %ack.cmd_id,
            success = ack.success,
            error = ?ack.error,
            "command acknowledged"
        );

        let mut state = self.gateway.lock().await;
        if let Some(owner) = state.pending.resolve(ack) {
            if owner != ack.device_id {
                tracing::warn!(
                    device_id = %owner,
                    reported = %ack.device_id,
                    cmd_id = %ack.cmd_id,
                    "ack reported a different device id"
                );
            }
            state.devices.record_ack(&owner, ack, Utc::now());
        } else {
            tracing::debug!(cmd_id = %ack.cmd_id, "no pending command for ack, discarding");
        }
    }

    fn on_event(&self, event: DeviceEvent) {
        let data = serde_json::Value::Object(event.data);
        tracing::info!(
            connection_id = %self.connection.id(),
            device_id = %event.device_id,
            event = %event.event,
            data = %data,
            "device event"
        );
    }

    /// Handle the connection closing
    ///
    /// Marks the bound device offline and cancels its pending commands,
    /// returning how many were cancelled.
    ///
    /// Exception: when a newer connection has since reported the same device
    /// id, this connection no longer owns the entry. Closing it then neither
    /// marks the device offline nor cancels anything; commands in flight were
    /// written to the newer connection.
    pub async fn close(self) -> usize {
        let SessionState::Identified { device_id } = self.state else {
            tracing::debug!(connection_id = %self.connection.id(), "unidentified connection closed");
            return 0;
        };

        let mut state = self.gateway.lock().await;

        let current = state
            .devices
            .get(&device_id)
            .and_then(|device| device.connection.as_ref())
            .map(DeviceConnection::id);
        if current.is_some_and(|id| id != self.connection.id()) {
            tracing::info!(
                device_id = %device_id,
                connection_id = %self.connection.id(),
                "superseded connection closed"
            );
            return 0;
        }

        state.devices.upsert(&device_id, DeviceUpdate::disconnected());
        let cancelled = state.pending.cancel_device(&device_id);

        tracing::info!(device_id = %device_id, cancelled, "device disconnected");
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use super::*;
    use crate::commands::DEFAULT_COMMAND_TIMEOUT;
    use crate::error::CommandError;
    use crate::protocol::CommandAction;

    fn status_frame(device_id: &str, ball_count: u32) -> String {
        json!({
            "type": "status",
            "device_id": device_id,
            "uptime_s": 10,
            "ball_count": ball_count,
            "dispenser": { "state": "idle", "last_dispense_ts": 0, "total_dispensed": 0, "error": null }
        })
        .to_string()
    }

    fn ack_frame(device_id: &str, cmd_id: &str, success: bool) -> String {
        json!({
            "type": "cmd_ack",
            "device_id": device_id,
            "cmd_id": cmd_id,
            "success": success,
            "error": if success { Value::Null } else { json!("empty") },
            "data": { "balls_remaining": 4 }
        })
        .to_string()
    }

    fn open(gateway: &Gateway) -> (DeviceSession, mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = DeviceSession::open(gateway.clone(), DeviceConnection::new(&tx));
        (session, tx, rx)
    }

    fn cmd_id_of(frame: &str) -> String {
        let value: Value = serde_json::from_str(frame).unwrap();
        value["cmd_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn first_status_identifies() {
        let gateway = Gateway::default();
        let (mut session, _tx, _rx) = open(&gateway);
        assert_eq!(session.state(), &SessionState::Unidentified);

        session.handle_text(&status_frame("d1", 5)).await;
        assert_eq!(session.device_id(), Some("d1"));

        let device = gateway.device("d1").await.unwrap();
        assert!(device.online);
        assert!(device.is_reachable());
        assert_eq!(device.ball_count(), Some(5));
    }

    #[tokio::test]
    async fn identity_is_bound_once() {
        let gateway = Gateway::default();
        let (mut session, _tx, _rx) = open(&gateway);

        session.handle_text(&status_frame("d1", 5)).await;
        session.handle_text(&status_frame("d2", 3)).await;

        assert_eq!(session.device_id(), Some("d1"));
        assert_eq!(gateway.devices().await.len(), 2);
    }

    #[tokio::test]
    async fn later_status_supersedes_earlier() {
        let gateway = Gateway::default();
        let (mut session, _tx, _rx) = open(&gateway);

        session.handle_text(&status_frame("d1", 5)).await;
        session.handle_text(&status_frame("d1", 2)).await;

        assert_eq!(gateway.device("d1").await.unwrap().ball_count(), Some(2));
    }

    #[tokio::test]
    async fn garbage_is_dropped() {
        let gateway = Gateway::default();
        let (mut session, _tx, _rx) = open(&gateway);

        session.handle_text("{not json").await;
        session.handle_text(r#"{"type":"mystery"}"#).await;
        session.handle_text(r#"{"type":"status"}"#).await;
        session
            .handle_text(r#"{"type":"event","device_id":"d1","event":"low_balls","data":{}}"#)
            .await;

        assert_eq!(session.state(), &SessionState::Unidentified);
        assert!(gateway.devices().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dispense_scenario() {
        let gateway = Gateway::default();
        let (mut session, _tx, mut rx) = open(&gateway);
        session.handle_text(&status_frame("d1", 5)).await;

        let pending = gateway.dispatch("d1", &CommandAction::dispense(1)).await.unwrap();
        let cmd_id = cmd_id_of(&rx.recv().await.unwrap());

        session.handle_text(&ack_frame("d1", &cmd_id, true)).await;

        let ack = pending.await.unwrap().unwrap();
        assert!(ack.success);
        assert_eq!(ack.data["balls_remaining"], 4);

        let device = gateway.device("d1").await.unwrap();
        assert_eq!(device.command_history.len(), 1);
        let record = &device.command_history[0];
        assert_eq!(record.cmd_id, cmd_id);
        assert_eq!(record.action, "dispense");
        assert!(record.ack.as_ref().is_some_and(|a| a.success));
        assert!(record.acked_at.is_some());
        // Ball count only changes with the next status report
        assert_eq!(device.ball_count(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn device_side_failure_is_an_ack() {
        let gateway = Gateway::default();
        let (mut session, _tx, mut rx) = open(&gateway);
        session.handle_text(&status_frame("d1", 0)).await;

        let pending = gateway.dispatch("d1", &CommandAction::dispense(1)).await.unwrap();
        let cmd_id = cmd_id_of(&rx.recv().await.unwrap());
        session.handle_text(&ack_frame("d1", &cmd_id, false)).await;

        let ack = pending.await.unwrap().unwrap();
        assert!(!ack.success);
        assert_eq!(ack.error.as_deref(), Some("empty"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_ack_changes_nothing() {
        let gateway = Gateway::default();
        let (mut session, _tx, mut rx) = open(&gateway);
        session.handle_text(&status_frame("d1", 5)).await;

        let result = gateway.send_command("d1", CommandAction::Ping).await;
        assert!(matches!(result, Err(CommandError::CommandTimeout { .. })));

        let cmd_id = cmd_id_of(&rx.recv().await.unwrap());
        session.handle_text(&ack_frame("d1", &cmd_id, true)).await;

        let device = gateway.device("d1").await.unwrap();
        assert!(device.command_history[0].ack.is_none());
        assert_eq!(gateway.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_every_pending_command() {
        let gateway = Gateway::default();
        let (mut session, _tx, _rx) = open(&gateway);
        session.handle_text(&status_frame("d1", 5)).await;

        let mut receivers = Vec::new();
        for _ in 0..3 {
            receivers.push(gateway.dispatch("d1", &CommandAction::Ping).await.unwrap());
        }

        assert_eq!(session.close().await, 3);

        for rx in receivers {
            assert!(matches!(
                rx.await.unwrap(),
                Err(CommandError::DeviceDisconnected { .. })
            ));
        }

        // No deadline fires after the sweep
        tokio::time::advance(DEFAULT_COMMAND_TIMEOUT * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(gateway.pending_count().await, 0);

        let device = gateway.device("d1").await.unwrap();
        assert!(!device.online);
        assert!(device.connection.is_none());
        assert_eq!(device.command_history.len(), 3);
    }

    #[tokio::test]
    async fn close_leaves_other_devices_alone() {
        let gateway = Gateway::default();
        let (mut first, _tx1, _rx1) = open(&gateway);
        let (mut second, _tx2, _rx2) = open(&gateway);
        first.handle_text(&status_frame("d1", 5)).await;
        second.handle_text(&status_frame("d2", 5)).await;

        let _d2_pending = gateway.dispatch("d2", &CommandAction::Ping).await.unwrap();
        assert_eq!(first.close().await, 0);

        assert!(gateway.device("d2").await.unwrap().online);
        assert_eq!(gateway.pending_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_patches_history_of_issuing_device() {
        let gateway = Gateway::default();
        let (mut session, _tx, mut rx) = open(&gateway);
        session.handle_text(&status_frame("d1", 5)).await;
        let (mut other, _tx2, _rx2) = open(&gateway);
        other.handle_text(&status_frame("d2", 5)).await;

        let pending = gateway.dispatch("d1", &CommandAction::Ping).await.unwrap();
        let cmd_id = cmd_id_of(&rx.recv().await.unwrap());

        // Firmware echoing the wrong device id still settles the command
        session.handle_text(&ack_frame("d2", &cmd_id, true)).await;
        assert!(pending.await.unwrap().unwrap().success);

        let d1 = gateway.device("d1").await.unwrap();
        assert!(d1.command_history[0].ack.is_some());
        assert!(gateway.device("d2").await.unwrap().command_history.is_empty());
    }

    #[tokio::test]
    async fn events_leave_state_untouched() {
        let gateway = Gateway::default();
        let (mut session, _tx, _rx) = open(&gateway);
        session.handle_text(&status_frame("d1", 1)).await;

        let event = json!({
            "type": "event",
            "device_id": "d1",
            "event": "low_balls",
            "data": { "ball_count": 1, "threshold": 2 }
        });
        session.handle_text(&event.to_string()).await;

        let device = gateway.device("d1").await.unwrap();
        assert!(device.online);
        assert_eq!(device.ball_count(), Some(1));
        assert!(device.command_history.is_empty());
    }

    #[tokio::test]
    async fn unidentified_close_is_noop() {
        let gateway = Gateway::default();
        let (session, _tx, _rx) = open(&gateway);
        assert_eq!(session.close().await, 0);
        assert!(gateway.devices().await.is_empty());
    }

    #[tokio::test]
    async fn superseded_connection_close_keeps_device_online() {
        let gateway = Gateway::default();
        let (mut old, _tx1, _rx1) = open(&gateway);
        old.handle_text(&status_frame("d1", 5)).await;

        let (mut new, _tx2, _rx2) = open(&gateway);
        new.handle_text(&status_frame("d1", 5)).await;

        let _pending = gateway.dispatch("d1", &CommandAction::Ping).await.unwrap();
        assert_eq!(old.close().await, 0);

        let device = gateway.device("d1").await.unwrap();
        assert!(device.online);
        assert!(device.is_reachable());
        assert_eq!(gateway.pending_count().await, 1);
    }
}
