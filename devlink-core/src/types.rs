//! JSON-RPC 2.0 wire types used by the device-control channel
//!
//! The client only ever originates calls, so outbound envelopes always carry
//! an integer id. Inbound traffic is either a response correlated to one of
//! those ids or an unsolicited notification; [`Frame`] is the decoded view
//! of a single inbound message.
//!
//! # Envelopes
//!
//! ```text
//! call          {"jsonrpc":"2.0","method":"m","params":{..},"id":7}
//! response      {"jsonrpc":"2.0","result":..,"id":7}
//! error         {"jsonrpc":"2.0","error":{"code":..,"message":..},"id":7}
//! notification  {"jsonrpc":"2.0","method":"m","params":{..}}
//! ```

use crate::error::JsonRpcErrorData;
use serde::{Deserialize, Serialize};

/// Protocol version string carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Identifier assigned to an outbound call
///
/// Ids are allocated per connection epoch starting at 1, so the same value
/// may appear again after a reconnect.
pub type CallId = u64;

/// Outbound call envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: CallId,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: CallId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// Server-pushed message with no id and no expected reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Params as a value, `Null` when the server omitted them
    pub fn params_or_null(&self) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        self.params.as_ref().unwrap_or(&NULL)
    }
}

/// Response envelope
///
/// The client decodes responses through [`Frame`]; this type exists for
/// producing responses, mainly in test doubles that play the server role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
    pub id: CallId,
}

impl JsonRpcResponse {
    pub fn success(result: serde_json::Value, id: CallId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: JsonRpcErrorData, id: CallId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Decoded inbound frame
///
/// Produced by [`crate::codec::decode`], which never fails: anything that is
/// not a well-formed response or notification becomes [`Frame::Malformed`].
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Successful response to the call with this id
    Response {
        id: CallId,
        result: serde_json::Value,
    },
    /// Server-reported failure for the call with this id
    ErrorResponse { id: CallId, error: JsonRpcErrorData },
    /// Unsolicited server push
    Notification(JsonRpcNotification),
    /// Frame that could not be interpreted
    Malformed { reason: String },
}

impl Frame {
    pub fn is_response(&self) -> bool {
        matches!(self, Frame::Response { .. } | Frame::ErrorResponse { .. })
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Frame::Notification(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Frame::Malformed { .. })
    }

    /// Id of the call this frame answers, if it is a response
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Frame::Response { id, .. } | Frame::ErrorResponse { id, .. } => Some(*id),
            _ => None,
        }
    }
}
