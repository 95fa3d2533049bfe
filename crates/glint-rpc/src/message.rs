//! JSON-RPC 2.0 wire types.
//!
//! A message on the wire is one of three shapes, discriminated by field
//! presence: a request carries `id` and `method`, a notification carries
//! `method` without `id`, and a response carries `id` with `result` or
//! `error`. Classification is explicit rather than serde-untagged so that
//! malformed input can be dropped deliberately instead of mis-parsed.

use crate::error::ErrorObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC protocol version emitted on every outgoing message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved notification method used to cancel an in-flight request.
pub const CANCEL_METHOD: &str = "$/cancelRequest";

/// JSON-RPC request/response ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 request: expects a matching response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification: fire-and-forget, no response is ever sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response: exactly one of `result`/`error` is present.
///
/// A successful response always serializes its `result`, even when the
/// result is `null`; an error response omits `result` entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse into the outcome the request's sender observes.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// The wire-level unit: tagged union over the three message shapes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Classify a raw JSON value by field presence.
    ///
    /// Returns the original value as the error so callers can log what
    /// they dropped. `jsonrpc` is not validated; real clients get it wrong.
    pub fn classify(raw: Value) -> Result<Message, Value> {
        let obj = match raw.as_object() {
            Some(obj) => obj,
            None => return Err(raw),
        };

        if obj.contains_key("method") {
            if obj.contains_key("id") {
                return match Request::deserialize(&raw) {
                    Ok(request) => Ok(Message::Request(request)),
                    Err(_) => Err(raw),
                };
            }
            return match Notification::deserialize(&raw) {
                Ok(notification) => Ok(Message::Notification(notification)),
                Err(_) => Err(raw),
            };
        }

        // No method: a response must carry an id plus result or error.
        if obj.contains_key("id") && (obj.contains_key("result") || obj.contains_key("error")) {
            return match Response::deserialize(&raw) {
                Ok(response) => Ok(Message::Response(response)),
                Err(_) => Err(raw),
            };
        }

        Err(raw)
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

/// Params payload of a `$/cancelRequest` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelParams {
    pub id: RequestId,
}
