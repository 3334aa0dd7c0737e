//! Relay wire protocol
//!
//! - [`messages`] - serde types for everything exchanged with the relay
//! - [`encoder`] - cached motor frame encoding for the control hot path

pub mod encoder;
pub mod messages;

pub use encoder::{CommandEncoder, ZERO_COMMAND_JSON};
pub use messages::{
    ClientEntry, IdentityAnnouncement, InboundMessage, MotorChannels, MotorFrame, RelayRequest,
    CONNECTION_ACK,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed {0}")]
    Malformed(String),
}
