//! JSON messages exchanged with the relay

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ProtocolError;
use crate::controller::ControlCommand;

/// Body of the relay's connection acknowledgement
pub const CONNECTION_ACK: &str = "Connected successfully";

/// Motor frame, serialized as `{"SHIPMOTRO":{...}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorFrame {
    #[serde(rename = "SHIPMOTRO")]
    pub motors: MotorChannels,
}

/// Field order matches what the vessel firmware expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct MotorChannels {
    pub ch1: u8,
    pub dir1: u8,
    pub en1: u8,
    pub ch2: u8,
    pub dir2: u8,
    pub en2: u8,
}

impl From<&ControlCommand> for MotorFrame {
    fn from(cmd: &ControlCommand) -> Self {
        Self {
            motors: MotorChannels {
                ch1: cmd.left_thrust(),
                dir1: cmd.left_direction().wire(),
                en1: cmd.left_enable().wire(),
                ch2: cmd.right_thrust(),
                dir2: cmd.right_direction().wire(),
                en2: cmd.right_enable().wire(),
            },
        }
    }
}

impl From<MotorFrame> for ControlCommand {
    fn from(frame: MotorFrame) -> Self {
        let m = frame.motors;
        ControlCommand::from_key([m.ch1, m.dir1, m.en1, m.ch2, m.dir2, m.en2])
    }
}

impl MotorFrame {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a motor frame; `Ok(None)` for any other JSON message.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("SHIPMOTRO").is_none() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

/// Identity announcement sent right after the relay acknowledges us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAnnouncement {
    pub device_id: String,
    pub identity: String,
}

impl IdentityAnnouncement {
    pub fn new(device_id: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            identity: identity.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reads an announcement; `Ok(None)` when `text` carries a `type` tag.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("type").is_some() || value.get("identity").is_none() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

/// Typed requests to the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRequest {
    QueryRoom,
}

impl RelayRequest {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("type").and_then(Value::as_str) {
            Some("query_room") => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub device_id: String,
    pub identity: String,
}

/// Messages the relay pushes to us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Connection {
        #[serde(default)]
        message: String,
    },
    Room {
        room_id: String,
    },
    RoomInfo {
        room_id: String,
        #[serde(default)]
        total_clients: u32,
        clients: Vec<ClientEntry>,
    },
}

impl InboundMessage {
    const KNOWN_TYPES: [&'static str; 3] = ["connection", "room", "room_info"];

    /// Decodes a relay message.
    ///
    /// Messages without a `type` or with a type we do not handle yield
    /// `Ok(None)`. Known types with missing or mistyped fields are errors.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
            debug!("Ignoring relay message without type: {}", text);
            return Ok(None);
        };
        if !Self::KNOWN_TYPES.contains(&kind.as_str()) {
            debug!("Ignoring relay message of type {}", kind);
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ProtocolError::Malformed(format!("{} message: {}", kind, e)))
    }

    pub fn is_connection_ack(&self) -> bool {
        matches!(self, InboundMessage::Connection { message } if message == CONNECTION_ACK)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
