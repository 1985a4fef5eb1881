//! Wire protocol spoken over the device WebSocket
//!
//! Devices send `status`, `cmd_ack` and `event` frames; the gateway sends `cmd`
//! frames. Every frame is a JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Open key/value payload carried by acks, events and unrecognized commands
pub type JsonMap = Map<String, Value>;

/// Dispenser mechanism state as reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispenserState {
    #[default]
    Idle,
    Dispensing,
    Error,
}

/// Dispenser sub-report inside a status message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispenserReport {
    #[serde(default)]
    pub state: DispenserState,
    #[serde(default)]
    pub last_dispense_ts: u64,
    #[serde(default)]
    pub total_dispensed: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Periodic device report
///
/// Only `device_id` is required; firmware revisions that omit a metric still
/// identify themselves. Fields this gateway does not know are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub uptime_s: f64,
    #[serde(default)]
    pub free_heap: u64,
    #[serde(default)]
    pub wifi_rssi: i32,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub cpu_freq_mhz: u32,
    #[serde(default)]
    pub temp_c: f64,
    #[serde(default)]
    pub ball_count: u32,
    #[serde(default)]
    pub servo_open_angle: u16,
    #[serde(default)]
    pub servo_settle_ms: u32,
    #[serde(default)]
    pub sensor_distance_mm: Option<i32>,
    #[serde(default)]
    pub dispenser: DispenserReport,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Device reply to a specific command id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub device_id: String,
    pub cmd_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub data: JsonMap,
}

/// Device notification of a state transition (`empty`, `low_balls`, `refilled`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub device_id: String,
    pub event: String,
    #[serde(default)]
    pub data: JsonMap,
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Status(StatusReport),
    CmdAck(CommandAck),
    Event(DeviceEvent),
    /// Well-formed JSON with a `type` this gateway does not handle
    Unknown(String),
}

impl DeviceMessage {
    /// Decode a text frame
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the frame is not JSON, has no `type`, or a
    /// known type carries a payload that does not match its schema
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let kind = value
            .as_object_mut()
            .and_then(|obj| obj.remove("type"))
            .and_then(|kind| kind.as_str().map(ToString::to_string))
            .ok_or(ProtocolError::MissingType)?;

        match kind.as_str() {
            "status" => serde_json::from_value(value)
                .map(Self::Status)
                .map_err(invalid("status")),
            "cmd_ack" => serde_json::from_value(value)
                .map(Self::CmdAck)
                .map_err(invalid("cmd_ack")),
            "event" => serde_json::from_value(value)
                .map(Self::Event)
                .map_err(invalid("event")),
            _ => Ok(Self::Unknown(kind)),
        }
    }
}

fn invalid(kind: &'static str) -> impl FnOnce(serde_json::Error) -> ProtocolError {
    move |source| ProtocolError::InvalidPayload { kind, source }
}

/// Parameters of a `dispense` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseParams {
    #[serde(default = "default_dispense_count")]
    pub count: u32,
}

const fn default_dispense_count() -> u32 {
    1
}

impl Default for DispenseParams {
    fn default() -> Self {
        Self {
            count: default_dispense_count(),
        }
    }
}

/// Parameters of a `set_ball_count` command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBallCountParams {
    #[serde(default)]
    pub count: u32,
}

/// Parameters of a `set_config` command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetConfigParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_open_angle: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo_settle_ms: Option<u32>,
    /// Settings newer firmware may understand
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// An action the gateway can ask a device to perform
#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    Dispense(DispenseParams),
    SetBallCount(SetBallCountParams),
    Ping,
    SetConfig(SetConfigParams),
    /// Passed through verbatim; the device answers `unknown_action` if it
    /// does not support it
    Other { action: String, params: JsonMap },
}

impl CommandAction {
    /// Build an action from its wire name and open parameter map
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidPayload` if a known action's parameters
    /// do not match its schema (e.g. a negative `count`)
    pub fn from_parts(action: &str, params: JsonMap) -> Result<Self, ProtocolError> {
        match action {
            "dispense" => serde_json::from_value(Value::Object(params))
                .map(Self::Dispense)
                .map_err(invalid("dispense")),
            "set_ball_count" => serde_json::from_value(Value::Object(params))
                .map(Self::SetBallCount)
                .map_err(invalid("set_ball_count")),
            "ping" => Ok(Self::Ping),
            "set_config" => serde_json::from_value(Value::Object(params))
                .map(Self::SetConfig)
                .map_err(invalid("set_config")),
            other => Ok(Self::Other {
                action: other.to_string(),
                params,
            }),
        }
    }

    /// Dispense `count` balls
    #[must_use]
    pub const fn dispense(count: u32) -> Self {
        Self::Dispense(DispenseParams { count })
    }

    /// Overwrite the device's ball counter
    #[must_use]
    pub const fn set_ball_count(count: u32) -> Self {
        Self::SetBallCount(SetBallCountParams { count })
    }

    /// Wire name of the action
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Dispense(_) => "dispense",
            Self::SetBallCount(_) => "set_ball_count",
            Self::Ping => "ping",
            Self::SetConfig(_) => "set_config",
            Self::Other { action, .. } => action,
        }
    }

    /// Parameters as a JSON object
    ///
    /// # Errors
    ///
    /// Returns error if the parameters fail to serialize
    pub fn params(&self) -> serde_json::Result<Value> {
        match self {
            Self::Dispense(p) => serde_json::to_value(p),
            Self::SetBallCount(p) => serde_json::to_value(p),
            Self::Ping => Ok(Value::Object(JsonMap::new())),
            Self::SetConfig(p) => serde_json::to_value(p),
            Self::Other { params, .. } => Ok(Value::Object(params.clone())),
        }
    }
}

/// Frame sent from the gateway to a device
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage<'a> {
    Cmd {
        cmd_id: &'a str,
        action: &'a str,
        params: Value,
    },
}

impl<'a> GatewayMessage<'a> {
    /// Build a `cmd` frame for `action`
    ///
    /// # Errors
    ///
    /// Returns error if the action parameters fail to serialize
    pub fn command(cmd_id: &'a str, action: &'a CommandAction) -> serde_json::Result<Self> {
        Ok(Self::Cmd {
            cmd_id,
            action: action.name(),
            params: action.params()?,
        })
    }

    /// Serialize to a text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
