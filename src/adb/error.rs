use std::time::Duration;
use thiserror::Error;

use super::codec::CodecError;

/// A specialized `Result` type for remote-control operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// The error type for every transport, registry and dispatcher operation.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Transport unavailable: {description}. Command dropped.")]
    TransportUnavailable { description: String },

    #[error("Device '{device_id}' is not connected")]
    NotConnected { device_id: String },

    #[error("Failed to connect to {device_id}: {reason}")]
    ConnectFailure { device_id: String, reason: String },

    #[error("Operation timed out after {duration:?}: {operation}")]
    ProtocolTimeout {
        operation: String,
        duration: Duration,
    },

    #[error("Malformed message: {description}")]
    MalformedMessage { description: String },

    #[error("A {operation} request is already in flight")]
    OperationInFlight { operation: &'static str },

    #[error("Invalid {what} '{value}'")]
    InvalidArgument { what: &'static str, value: String },

    #[error("Invalid MAC address '{value}'")]
    InvalidMacAddress { value: String },

    #[error("Bridge relay reported an error: {message}")]
    Relay { message: String },

    #[error("ADB wire protocol error: {source}")]
    Codec {
        #[from]
        source: CodecError,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("WebSocket error: {source}")]
    WebSocket {
        #[from]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("State store error at {path}: {description}")]
    Store { path: String, description: String },
}

impl RemoteError {
    pub fn unavailable(description: impl Into<String>) -> Self {
        RemoteError::TransportUnavailable {
            description: description.into(),
        }
    }

    pub fn connect_failure(device_id: &str, reason: impl ToString) -> Self {
        RemoteError::ConnectFailure {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error means the transport can no longer be used and
    /// should be dropped from the connection manager.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            RemoteError::Io { source } => matches!(
                source.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::NotConnected
            ),
            RemoteError::Codec { source } => !matches!(source, CodecError::InsufficientData { .. }),
            _ => false,
        }
    }
}
