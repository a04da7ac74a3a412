//! Codec for the device-control wire protocol
//!
//! Outbound, the client only produces call envelopes ([`encode_call`]).
//! Inbound, [`decode`] turns one raw text frame into a [`Frame`].
//!
//! # Malformed Frames
//!
//! Decoding never returns an error. A frame that is not valid JSON, is not a
//! JSON-RPC 2.0 object, or does not fit the response/notification shapes is
//! reported as [`Frame::Malformed`] with a human-readable reason. A single bad
//! frame is a protocol hiccup, not a reason to drop a healthy session, so the
//! caller decides what to do with it (the connection manager logs it and
//! carries on).
//!
//! Batches (top-level arrays) are not part of this protocol and are reported
//! as malformed.
//!
//! # Examples
//!
//! ```rust
//! use devlink_core::{codec, Frame};
//! use serde_json::json;
//!
//! let text = codec::encode_call(1, "ping", Some(json!({}))).unwrap();
//! assert!(text.contains("\"id\":1"));
//!
//! let frame = codec::decode(r#"{"jsonrpc":"2.0","result":"pong","id":1}"#);
//! assert_eq!(frame, Frame::Response { id: 1, result: json!("pong") });
//! ```

use crate::error::{Error, JsonRpcErrorData, Result};
use crate::types::{
    CallId, Frame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};
use serde::Serialize;
use serde_json::{Map, Value};

/// Encode any serializable message to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode an outbound call envelope
///
/// `params` is omitted from the envelope when `None`.
pub fn encode_call(id: CallId, method: &str, params: Option<Value>) -> Result<String> {
    encode(&JsonRpcRequest::new(method, params, id))
}

/// Encode a response envelope (server role, used by test doubles)
pub fn encode_response(resp: &JsonRpcResponse) -> Result<String> {
    encode(resp)
}

/// Encode a notification envelope (server role, used by test doubles)
pub fn encode_notification(notif: &JsonRpcNotification) -> Result<String> {
    encode(notif)
}

/// Decode one inbound text frame
pub fn decode(data: &str) -> Frame {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => return malformed(format!("invalid JSON: {}", e)),
    };

    let object = match value {
        Value::Object(object) => object,
        Value::Array(_) => return malformed("batch frames are not supported"),
        other => return malformed(format!("expected a JSON object, got {}", type_name(&other))),
    };

    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        Some(other) => return malformed(format!("unsupported jsonrpc version {}", other)),
        None => return malformed("missing jsonrpc version"),
    }

    if object.contains_key("method") {
        decode_notification(object)
    } else {
        decode_response(object)
    }
}

fn decode_notification(object: Map<String, Value>) -> Frame {
    if object.get("id").is_some_and(|id| !id.is_null()) {
        return malformed("server-initiated requests are not supported");
    }

    match serde_json::from_value::<JsonRpcNotification>(Value::Object(object)) {
        Ok(notification) => Frame::Notification(notification),
        Err(e) => malformed(format!("invalid notification: {}", e)),
    }
}

fn decode_response(mut object: Map<String, Value>) -> Frame {
    let error = object.remove("error").filter(|error| !error.is_null());
    let result = object.remove("result");

    let id = match object.get("id") {
        Some(Value::Number(number)) => match number.as_u64() {
            Some(id) => id,
            None => return malformed(format!("response id {} is not a call id", number)),
        },
        Some(Value::Null) | None => {
            // An error without an id answers a request the server could not parse.
            return match error {
                Some(error) => malformed(format!("uncorrelated error response: {}", error)),
                None => malformed("response without id"),
            };
        }
        Some(other) => {
            return malformed(format!("response id must be an integer, got {}", type_name(other)))
        }
    };

    match (result, error) {
        (Some(result), None) => Frame::Response { id, result },
        (None, Some(error)) | (Some(Value::Null), Some(error)) => {
            match serde_json::from_value::<JsonRpcErrorData>(error) {
                Ok(error) => Frame::ErrorResponse { id, error },
                Err(e) => malformed(format!("invalid error object in response {}: {}", id, e)),
            }
        }
        (Some(_), Some(_)) => malformed(format!("response {} carries both result and error", id)),
        (None, None) => malformed(format!("response {} carries neither result nor error", id)),
    }
}

fn malformed(reason: impl Into<String>) -> Frame {
    Frame::Malformed {
        reason: reason.into(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reason(frame: Frame) -> String {
        match frame {
            Frame::Malformed { reason } => reason,
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_call_envelope() {
        let text = encode_call(7, "take_snapshot", Some(json!({"camera": 2}))).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "take_snapshot");
        assert_eq!(value["params"]["camera"], 2);
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn test_encode_call_without_params() {
        let text = encode_call(1, "ping", None).unwrap();
        assert!(!text.contains("params"));
    }

    #[test]
    fn test_decode_success_response() {
        let frame = decode(r#"{"jsonrpc":"2.0","result":{"recording":true},"id":3}"#);
        assert_eq!(
            frame,
            Frame::Response {
                id: 3,
                result: json!({"recording": true})
            }
        );
    }

    #[test]
    fn test_decode_null_result() {
        let frame = decode(r#"{"jsonrpc":"2.0","result":null,"id":3}"#);
        assert_eq!(
            frame,
            Frame::Response {
                id: 3,
                result: Value::Null
            }
        );
    }

    #[test]
    fn test_decode_error_response() {
        let frame = decode(
            r#"{"jsonrpc":"2.0","error":{"code":-32001,"message":"bad token","data":{"hint":"login"}},"id":12}"#,
        );
        match frame {
            Frame::ErrorResponse { id, error } => {
                assert_eq!(id, 12);
                assert_eq!(error.code, -32001);
                assert_eq!(error.message, "bad token");
                assert_eq!(error.data, Some(json!({"hint": "login"})));
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_with_null_result() {
        let frame = decode(
            r#"{"jsonrpc":"2.0","result":null,"error":{"code":-32603,"message":"boom"},"id":2}"#,
        );
        assert!(matches!(frame, Frame::ErrorResponse { id: 2, .. }));
    }

    #[test]
    fn test_decode_notification() {
        let frame = decode(r#"{"jsonrpc":"2.0","method":"status_update","params":{"cpu":12}}"#);
        match frame {
            Frame::Notification(notification) => {
                assert_eq!(notification.method, "status_update");
                assert_eq!(notification.params, Some(json!({"cpu": 12})));
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification_with_null_id() {
        let frame = decode(r#"{"jsonrpc":"2.0","method":"tick","id":null}"#);
        assert!(frame.is_notification());
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(reason(decode("not valid json")).starts_with("invalid JSON"));
        assert!(reason(decode("")).starts_with("invalid JSON"));
    }

    #[test]
    fn test_non_object_is_malformed() {
        assert!(reason(decode("42")).contains("a number"));
        assert!(reason(decode(r#"[{"jsonrpc":"2.0","result":1,"id":1}]"#)).contains("batch"));
    }

    #[test]
    fn test_version_mismatch_is_malformed() {
        assert!(reason(decode(r#"{"jsonrpc":"1.0","result":1,"id":1}"#)).contains("version"));
        assert!(reason(decode(r#"{"result":1,"id":1}"#)).contains("missing"));
    }

    #[test]
    fn test_server_request_is_malformed() {
        let text = r#"{"jsonrpc":"2.0","method":"reboot","id":5}"#;
        assert!(reason(decode(text)).contains("server-initiated"));
    }

    #[test]
    fn test_bad_response_ids() {
        assert!(decode(r#"{"jsonrpc":"2.0","result":1,"id":"abc"}"#).is_malformed());
        assert!(decode(r#"{"jsonrpc":"2.0","result":1,"id":-4}"#).is_malformed());
        assert!(decode(r#"{"jsonrpc":"2.0","result":1,"id":1.5}"#).is_malformed());
        assert!(decode(r#"{"jsonrpc":"2.0","result":1}"#).is_malformed());
    }

    #[test]
    fn test_uncorrelated_error_is_malformed() {
        let text = r#"{"jsonrpc":"2.0","error":{"code":-32700,"message":"Parse error"},"id":null}"#;
        assert!(reason(decode(text)).contains("Parse error"));
    }

    #[test]
    fn test_ambiguous_responses_are_malformed() {
        let both = r#"{"jsonrpc":"2.0","result":1,"error":{"code":1,"message":"x"},"id":1}"#;
        assert!(reason(decode(both)).contains("both"));

        let neither = r#"{"jsonrpc":"2.0","id":1}"#;
        assert!(reason(decode(neither)).contains("neither"));

        let bad_error = r#"{"jsonrpc":"2.0","error":"oops","id":1}"#;
        assert!(reason(decode(bad_error)).contains("invalid error object"));
    }

    #[test]
    fn test_decode_frames_produced_by_server_helpers() {
        let response = JsonRpcResponse::success(json!("pong"), 1);
        let frame = decode(&encode_response(&response).unwrap());
        assert_eq!(frame.call_id(), Some(1));

        let notification = JsonRpcNotification::new("recording_stopped", None);
        let frame = decode(&encode_notification(&notification).unwrap());
        assert!(frame.is_notification());
    }
}
