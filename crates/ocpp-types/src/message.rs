//! Frame envelope types and the OCPP-J array codec
//!
//! Every frame on the wire is a JSON array whose first element is the
//! message type tag:
//!
//! - Call: `[2, "<uniqueId>", "<action>", {payload}]`
//! - CallResult: `[3, "<uniqueId>", {payload}]`
//! - CallError: `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {details}]`
//!
//! [`Message::decode`] never panics; any input that does not have one of the
//! three shapes yields an [`OcppError`].

use crate::{CallErrorCode, MessageType, OcppError, OcppResult};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// OCPP message envelope that wraps all frame kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call message (request)
    Call(CallMessage),
    /// CallResult message (successful response)
    CallResult(CallResultMessage),
    /// CallError message (error response)
    CallError(CallErrorMessage),
}

impl Message {
    /// Get the message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Call(_) => MessageType::Call,
            Message::CallResult(_) => MessageType::CallResult,
            Message::CallError(_) => MessageType::CallError,
        }
    }

    /// Get the unique message ID
    pub fn unique_id(&self) -> &str {
        match self {
            Message::Call(msg) => &msg.unique_id,
            Message::CallResult(msg) => &msg.unique_id,
            Message::CallError(msg) => &msg.unique_id,
        }
    }

    /// Create a new Call message with a freshly generated unique ID
    pub fn call<T>(action: impl Into<String>, payload: T) -> OcppResult<Self>
    where
        T: Serialize,
    {
        Ok(Message::Call(CallMessage::new(action, payload)?))
    }

    /// Create a CallResult message in response to a Call
    pub fn call_result(unique_id: impl Into<String>, payload: Value) -> Self {
        Message::CallResult(CallResultMessage {
            unique_id: unique_id.into(),
            payload,
        })
    }

    /// Create a CallError message in response to a Call
    pub fn call_error(
        unique_id: impl Into<String>,
        error_code: CallErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Message::CallError(CallErrorMessage::new(
            unique_id,
            error_code,
            error_description,
        ))
    }

    /// Parse a raw text frame
    pub fn decode(raw: &str) -> OcppResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Interpret an already-parsed JSON value as a frame
    pub fn from_value(value: Value) -> OcppResult<Self> {
        let Value::Array(items) = value else {
            return Err(OcppError::malformed("frame is not a JSON array"));
        };

        let tag = items
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| OcppError::malformed("first element must be an integer type tag"))?;
        let message_type = MessageType::try_from(tag)?;

        let mut items = items.into_iter().skip(1);
        let unique_id = match items.next() {
            Some(Value::String(id)) => id,
            _ => return Err(OcppError::malformed("unique id must be a string")),
        };
        let rest: Vec<Value> = items.collect();

        match message_type {
            MessageType::Call => {
                let [action, payload]: [Value; 2] = rest
                    .try_into()
                    .map_err(|_| OcppError::malformed("Call frame must have 4 elements"))?;
                let Value::String(action) = action else {
                    return Err(OcppError::malformed("action must be a string"));
                };
                Ok(Message::Call(CallMessage {
                    unique_id,
                    action,
                    payload,
                }))
            }
            MessageType::CallResult => {
                let [payload]: [Value; 1] = rest
                    .try_into()
                    .map_err(|_| OcppError::malformed("CallResult frame must have 3 elements"))?;
                Ok(Message::CallResult(CallResultMessage { unique_id, payload }))
            }
            MessageType::CallError => {
                // Details are optional for peers that send the 4-element form
                let mut rest = rest.into_iter();
                let (code, description, details) = match (rest.next(), rest.next(), rest.next()) {
                    (Some(Value::String(code)), Some(Value::String(description)), details) => {
                        (code, description, details.unwrap_or_else(empty_details))
                    }
                    _ => {
                        return Err(OcppError::malformed(
                            "CallError frame must carry string code and description",
                        ))
                    }
                };
                if rest.next().is_some() {
                    return Err(OcppError::malformed("CallError frame has too many elements"));
                }
                Ok(Message::CallError(CallErrorMessage {
                    unique_id,
                    error_code: code,
                    error_description: description,
                    error_details: details,
                }))
            }
        }
    }

    /// Build the JSON array representation of the frame
    pub fn to_value(&self) -> Value {
        match self {
            Message::Call(msg) => Value::Array(vec![
                Value::from(u8::from(MessageType::Call)),
                Value::String(msg.unique_id.clone()),
                Value::String(msg.action.clone()),
                msg.payload.clone(),
            ]),
            Message::CallResult(msg) => Value::Array(vec![
                Value::from(u8::from(MessageType::CallResult)),
                Value::String(msg.unique_id.clone()),
                msg.payload.clone(),
            ]),
            Message::CallError(msg) => Value::Array(vec![
                Value::from(u8::from(MessageType::CallError)),
                Value::String(msg.unique_id.clone()),
                Value::String(msg.error_code.clone()),
                Value::String(msg.error_description.clone()),
                msg.error_details.clone(),
            ]),
        }
    }

    /// Serialize the frame to its wire text
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}

impl std::str::FromStr for Message {
    type Err = OcppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Message::decode(s)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

fn empty_details() -> Value {
    Value::Object(Default::default())
}

/// OCPP Call message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct CallMessage {
    /// Unique message identifier
    pub unique_id: String,
    /// Action name (e.g., "Authorize", "StartTransaction")
    pub action: String,
    /// Message payload
    pub payload: Value,
}

impl CallMessage {
    /// Create a new Call message
    pub fn new<T>(action: impl Into<String>, payload: T) -> OcppResult<Self>
    where
        T: Serialize,
    {
        Ok(CallMessage {
            unique_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// OCPP CallResult message (successful response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResultMessage {
    /// Unique message identifier (same as corresponding Call)
    pub unique_id: String,
    /// Response payload
    pub payload: Value,
}

/// OCPP CallError message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallErrorMessage {
    /// Unique message identifier (same as corresponding Call)
    pub unique_id: String,
    /// Error code as sent on the wire; peers may use codes outside [`CallErrorCode`]
    pub error_code: String,
    /// Human-readable error description
    pub error_description: String,
    /// Additional error details
    pub error_details: Value,
}

impl CallErrorMessage {
    /// Create a new CallError message with empty details
    pub fn new(
        unique_id: impl Into<String>,
        error_code: CallErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        CallErrorMessage {
            unique_id: unique_id.into(),
            error_code: error_code.as_str().to_string(),
            error_description: error_description.into(),
            error_details: empty_details(),
        }
    }

    /// Typed error code, if it is one the protocol defines
    pub fn code(&self) -> Option<CallErrorCode> {
        self.error_code.parse().ok()
    }
}
