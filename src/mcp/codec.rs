//! JSON-RPC envelope codec.
//!
//! Classifies each frame as a request, response or notification and rejects
//! anything that does not fit one of those shapes. Decoding never guesses:
//! a frame that is almost a request is a [`Error::MalformedMessage`].

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::mcp::protocol::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    JSONRPC_VERSION,
};

/// A message that can be sent or received.
#[derive(Debug, Clone)]
pub enum Message {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl Message {
    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) => None,
        }
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedMessage(reason.into())
}

fn parse_id(value: &Value) -> Result<RequestId> {
    match value {
        Value::String(s) => Ok(RequestId::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| malformed("request id must be an integer or string")),
        _ => Err(malformed("request id must be an integer or string")),
    }
}

fn parse_params(obj: &Map<String, Value>) -> Result<Option<Value>> {
    match obj.get("params") {
        None | Some(Value::Null) => Ok(None),
        Some(p @ (Value::Object(_) | Value::Array(_))) => Ok(Some(p.clone())),
        Some(_) => Err(malformed("params must be an object or array")),
    }
}

/// Decode one frame.
pub fn decode(frame: &str) -> Result<Message> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => return Err(malformed("batch messages are not supported")),
        _ => return Err(malformed("message must be a JSON object")),
    };

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => return Err(malformed("jsonrpc must be \"2.0\"")),
    }

    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(parse_id(raw)?),
    };

    if let Some(method) = obj.get("method") {
        let method = method
            .as_str()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| malformed("method must be a non-empty string"))?
            .to_string();
        let params = parse_params(&obj)?;

        return Ok(match id {
            Some(id) => Message::Request(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                method,
                params,
            }),
            None => Message::Notification(JsonRpcNotification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params,
            }),
        });
    }

    let result = obj.get("result").cloned();
    let error = match obj.get("error") {
        None => None,
        Some(raw) => Some(
            serde_json::from_value::<JsonRpcError>(raw.clone())
                .map_err(|e| malformed(format!("invalid error object: {}", e)))?,
        ),
    };

    match (id.is_some(), result.is_some(), error.is_some()) {
        (_, true, true) => Err(malformed("response carries both result and error")),
        (true, true, false) | (_, false, true) => {
            Ok(Message::Response(JsonRpcResponse {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                result,
                error,
            }))
        }
        (false, true, false) => Err(malformed("successful response without id")),
        (_, false, false) => Err(malformed("message has neither method nor result/error")),
    }
}

/// Best-effort id recovery from a frame that failed to decode, so the
/// error response can still be correlated.
pub fn recover_id(frame: &str) -> Option<RequestId> {
    serde_json::from_str::<Value>(frame)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| parse_id(id).ok()))
}

/// Encode one message as a single-line frame.
pub fn encode(message: &Message) -> Result<String> {
    let json = match message {
        Message::Request(req) => serde_json::to_string(req)?,
        Message::Response(res) => serde_json::to_string(res)?,
        Message::Notification(notif) => serde_json::to_string(notif)?,
    };
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_decode_request() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}}"#).unwrap();
        match msg {
            Message::Request(req) => {
                assert_eq!(req.id, RequestId::Number(7));
                assert_eq!(req.method, "tools/list");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification() {
        let msg = decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(msg, Message::Notification(_)));
        assert_eq!(msg.method(), Some("notifications/initialized"));
    }

    #[test]
    fn test_decode_responses() {
        let ok = decode(r#"{"jsonrpc":"2.0","id":"a","result":{}}"#).unwrap();
        assert!(matches!(ok, Message::Response(ref r) if r.error.is_none()));

        let err = decode(
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
        )
        .unwrap();
        match err {
            Message::Response(r) => {
                assert!(r.id.is_none());
                assert_eq!(r.error.unwrap().code, -32700);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        let cases = [
            "not json",
            "[]",
            "42",
            r#"{"id":1,"method":"ping"}"#,
            r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":1,"method":""}"#,
            r#"{"jsonrpc":"2.0","id":1,"method":5}"#,
            r#"{"jsonrpc":"2.0","id":{"x":1},"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":"oops"}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#,
            r#"{"jsonrpc":"2.0","result":{}}"#,
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","id":1,"error":{"message":"no code"}}"#,
        ];

        for case in cases {
            let err = decode(case).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedMessage, "case: {}", case);
        }
    }

    #[test]
    fn test_recover_id() {
        assert_eq!(
            recover_id(r#"{"jsonrpc":"2.0","id":3,"method":""}"#),
            Some(RequestId::Number(3))
        );
        assert_eq!(recover_id("garbage"), None);
    }

    #[test]
    fn test_encode_is_single_line() {
        let msg = Message::Notification(JsonRpcNotification::new(
            "notifications/progress",
            Some(serde_json::json!({"text": "line1\nline2"})),
        ));
        let frame = encode(&msg).unwrap();
        assert!(!frame.contains('\n'));
        assert!(matches!(decode(&frame).unwrap(), Message::Notification(_)));
    }
}
