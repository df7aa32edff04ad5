//! Error types for mock CSMS operations

use ocpp_types::CallErrorCode;
use thiserror::Error;

/// Main error type for CSMS operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CsmsError {
    /// Inbound frame could not be parsed
    #[error("Invalid message format: {message}")]
    Decode { message: String },

    /// Inbound Call names an action without a handler
    #[error("Action {action} not supported")]
    UnsupportedAction { action: String },

    /// A handler failed while producing its response
    #[error("{message}")]
    Handler { message: String },

    /// Outbound call was not answered in time
    #[error("Request timeout: {action} after {timeout_secs}s")]
    RequestTimeout { action: String, timeout_secs: u64 },

    /// Owning connection closed while the outbound call was pending
    #[error("Connection closed: {identity}")]
    ConnectionClosed { identity: String },

    /// Peer answered an outbound call with a CallError
    #[error("{code}: {description}")]
    CallError { code: String, description: String },

    /// No live connection is registered for the identity
    #[error("Charge point {identity} not connected")]
    NotConnected { identity: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Validation error
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Transport error
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CsmsError {
    /// Wire error code used when this error answers an inbound Call
    pub fn call_error_code(&self) -> CallErrorCode {
        match self {
            CsmsError::Decode { .. } => CallErrorCode::ProtocolError,
            CsmsError::UnsupportedAction { .. } => CallErrorCode::NotImplemented,
            _ => CallErrorCode::InternalError,
        }
    }

    /// Outcome label used for metrics and logs of outbound calls
    pub fn outcome(&self) -> &'static str {
        match self {
            CsmsError::RequestTimeout { .. } => "timeout",
            CsmsError::ConnectionClosed { .. } => "closed",
            CsmsError::CallError { .. } => "error",
            CsmsError::NotConnected { .. } => "not_connected",
            _ => "failed",
        }
    }
}

impl From<ocpp_types::OcppError> for CsmsError {
    fn from(err: ocpp_types::OcppError) -> Self {
        CsmsError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CsmsError {
    fn from(err: std::io::Error) -> Self {
        CsmsError::Transport {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CsmsError {
    fn from(err: serde_json::Error) -> Self {
        CsmsError::Validation {
            message: err.to_string(),
        }
    }
}

/// Result type for CSMS operations
pub type CsmsResult<T> = Result<T, CsmsError>;
