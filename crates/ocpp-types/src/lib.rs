//! # OCPP Types
//!
//! Frame-level types shared by the mock Central System: the three OCPP-J
//! frame kinds, the call error codes, and the JSON array codec that turns
//! raw WebSocket text into [`Message`] values and back.

pub mod error;
pub mod message;

pub use error::*;
pub use message::*;

/// Re-export commonly used types
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

/// WebSocket sub-protocol token for OCPP 1.6 JSON
pub const OCPP16_SUBPROTOCOL: &str = "ocpp1.6";

/// Message type identifier for OCPP messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl TryFrom<i64> for MessageType {
    type Error = OcppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::CallResult),
            4 => Ok(MessageType::CallError),
            _ => Err(OcppError::InvalidMessageType(value)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> Self {
        msg_type as u8
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Call => write!(f, "CALL"),
            MessageType::CallResult => write!(f, "CALLRESULT"),
            MessageType::CallError => write!(f, "CALLERROR"),
        }
    }
}
