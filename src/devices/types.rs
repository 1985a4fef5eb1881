//! Device registry types

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{CommandAck, StatusReport};

/// Handle to a device's live connection
///
/// The transport task owns the strong sender; the registry only keeps a weak
/// one, so a closed socket makes this handle unusable even before the close
/// event is processed.
#[derive(Clone)]
pub struct DeviceConnection {
    id: Uuid,
    outbound: mpsc::WeakUnboundedSender<String>,
}

impl DeviceConnection {
    /// Wrap the transport's outbound frame queue
    #[must_use]
    pub fn new(outbound: &mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound: outbound.downgrade(),
        }
    }

    /// Identifier of this connection, distinct per socket
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the transport is still accepting frames
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound
            .upgrade()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a text frame for the device
    ///
    /// Returns false if the transport has gone away
    pub fn send(&self, frame: String) -> bool {
        self.outbound
            .upgrade()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

impl fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

/// One command sent to a device, with its acknowledgment once it arrives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub cmd_id: String,
    pub action: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
    pub ack: Option<CommandAck>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub acked_at: Option<DateTime<Utc>>,
}

impl CommandRecord {
    /// A record for a command that has just been sent
    #[must_use]
    pub fn sent(cmd_id: impl Into<String>, action: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            cmd_id: cmd_id.into(),
            action: action.into(),
            sent_at,
            ack: None,
            acked_at: None,
        }
    }
}

/// Canonical state of a device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceState {
    pub device_id: String,
    pub online: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    pub connection: Option<DeviceConnection>,
    pub status: Option<StatusReport>,
    pub command_history: VecDeque<CommandRecord>,
}

impl DeviceState {
    /// A device seen for the first time, offline until told otherwise
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            online: false,
            last_seen: Utc::now(),
            connection: None,
            status: None,
            command_history: VecDeque::new(),
        }
    }

    /// Whether a command can be written to this device right now
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.online && self.connection.as_ref().is_some_and(DeviceConnection::is_open)
    }

    /// Last reported ball count, if any status has arrived
    #[must_use]
    pub fn ball_count(&self) -> Option<u32> {
        self.status.as_ref().map(|s| s.ball_count)
    }
}

/// Partial update merged into a `DeviceState`
///
/// `None` leaves the field untouched. `connection: Some(None)` clears the
/// connection handle.
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
    pub connection: Option<Option<DeviceConnection>>,
    pub status: Option<StatusReport>,
}

impl DeviceUpdate {
    /// Update applied when a status report arrives over `connection`
    #[must_use]
    pub fn status(status: StatusReport, connection: DeviceConnection) -> Self {
        Self {
            online: Some(true),
            last_seen: Some(Utc::now()),
            connection: Some(Some(connection)),
            status: Some(status),
        }
    }

    /// Update applied when the device's connection closes
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            online: Some(false),
            connection: Some(None),
            ..Self::default()
        }
    }

    pub(crate) fn apply(self, state: &mut DeviceState) {
        if let Some(online) = self.online {
            state.online = online;
        }
        if let Some(last_seen) = self.last_seen {
            state.last_seen = last_seen;
        }
        if let Some(connection) = self.connection {
            state.connection = connection;
        }
        if let Some(status) = self.status {
            state.status = Some(status);
        }
    }
}
