//! Wire-level building blocks for devlink
//!
//! devlink talks JSON-RPC 2.0 over a persistent WebSocket to a remote
//! device-control service. This crate holds everything that does not depend
//! on a live connection:
//!
//! - **Types**: call, response and notification envelopes, plus [`Frame`],
//!   the decoded view of one inbound message
//! - **Codec**: encoding calls and classifying inbound text
//! - **Errors**: the caller-facing [`Error`] taxonomy and the service's
//!   error-code band
//! - **Observability**: OpenTelemetry and `tracing` pipeline setup
//!
//! The connection manager itself lives in `devlink-client`.
//!
//! # Example
//!
//! ```rust
//! use devlink_core::{codec, Error, Frame};
//! use serde_json::json;
//!
//! let outbound = codec::encode_call(1, "get_device_list", None).unwrap();
//! assert!(outbound.contains("get_device_list"));
//!
//! let inbound = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"nope"},"id":1}"#;
//! if let Frame::ErrorResponse { error, .. } = codec::decode(inbound) {
//!     let err = Error::Remote(error);
//!     assert!(!err.is_retryable());
//! }
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, ErrorCode, JsonRpcErrorData, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    CallId, Frame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};
