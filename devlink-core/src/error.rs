//! Error types for devlink
//!
//! Two layers of errors live here:
//!
//! - **Error**: every failure a caller of the connection manager can observe.
//!   Each variant is a distinct outcome so UI layers can map them to messages
//!   ("connection lost, reconnecting", "request timed out, retry?") without
//!   string matching.
//! - **JsonRpcErrorData**: the wire-format error object a server sends back in
//!   an error response. It is surfaced to callers as [`Error::Remote`].
//!
//! # Error Codes
//!
//! JSON-RPC 2.0 reserves:
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//!
//! The device-control service reports domain failures in its own band,
//! `-32001..=-32007`; see [`ErrorCode`].
//!
//! # Examples
//!
//! ```rust
//! use devlink_core::{ErrorCode, JsonRpcErrorData};
//!
//! let error = JsonRpcErrorData::new(-32002, "too many requests");
//! assert_eq!(error.kind(), ErrorCode::RateLimited);
//! assert!(error.kind().is_service_error());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A send was attempted while the channel was not open
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No response arrived before the call's deadline
    #[error("Call `{method}` timed out after {timeout:?}")]
    CallTimeout { method: String, timeout: Duration },

    /// The connection epoch ended while the call was outstanding
    #[error("Connection lost")]
    ConnectionLost,

    /// Malformed frame or codec mismatch
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error response
    #[error("Remote error: {0}")]
    Remote(JsonRpcErrorData),

    /// Automatic reconnection gave up
    #[error("Reconnect attempts exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure came from the channel rather than the server,
    /// so repeating the call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportUnavailable(_) | Error::CallTimeout { .. } | Error::ConnectionLost
        )
    }

    /// Server error object, for [`Error::Remote`]
    pub fn remote(&self) -> Option<&JsonRpcErrorData> {
        match self {
            Error::Remote(data) => Some(data),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Classification of the numeric code in an error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    AuthFailed,
    RateLimited,
    ResourceNotFound,
    ResourceConflict,
    UpstreamUnavailable,
    InsufficientStorage,
    CapabilityUnsupported,
    /// Reserved server band (`-32099..=-32000`) without a known meaning
    ServerError(i32),
    Other(i32),
}

impl ErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32001 => ErrorCode::AuthFailed,
            -32002 => ErrorCode::RateLimited,
            -32003 => ErrorCode::ResourceNotFound,
            -32004 => ErrorCode::ResourceConflict,
            -32005 => ErrorCode::UpstreamUnavailable,
            -32006 => ErrorCode::InsufficientStorage,
            -32007 => ErrorCode::CapabilityUnsupported,
            -32099..=-32000 => ErrorCode::ServerError(code),
            other => ErrorCode::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::AuthFailed => -32001,
            ErrorCode::RateLimited => -32002,
            ErrorCode::ResourceNotFound => -32003,
            ErrorCode::ResourceConflict => -32004,
            ErrorCode::UpstreamUnavailable => -32005,
            ErrorCode::InsufficientStorage => -32006,
            ErrorCode::CapabilityUnsupported => -32007,
            ErrorCode::ServerError(code) | ErrorCode::Other(code) => *code,
        }
    }

    /// One of the five codes reserved by JSON-RPC 2.0 itself
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::ParseError
                | ErrorCode::InvalidRequest
                | ErrorCode::MethodNotFound
                | ErrorCode::InvalidParams
                | ErrorCode::InternalError
        )
    }

    /// A domain failure from the service-specific band
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::AuthFailed
                | ErrorCode::RateLimited
                | ErrorCode::ResourceNotFound
                | ErrorCode::ResourceConflict
                | ErrorCode::UpstreamUnavailable
                | ErrorCode::InsufficientStorage
                | ErrorCode::CapabilityUnsupported
        )
    }
}

/// Error object carried by an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    pub code: i32,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(-32601, format!("Method not found: {}", method.into()))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    /// Classified code
    pub fn kind(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for JsonRpcErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}
