//! JSON-RPC error taxonomy and transport errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Stable JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const REQUEST_CANCELLED: i64 = -32800;
    /// Reserved server-error range, caller-assigned, application-defined.
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}

/// Taxonomy kind a wire error code maps to.
///
/// The code uniquely determines the kind except within the server-error
/// range, which is opaque; codes outside every known range are `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    RequestCancelled,
    ServerError,
    Unknown,
}

/// Structured JSON-RPC error object as it appears on the wire.
///
/// Equality is structural over `code`, `message` and `data`, so an object
/// deserialized from the wire compares equal to the one that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Error)]
#[error("{message} (code {code})")]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse Error")
    }

    pub fn invalid_request() -> Self {
        Self::new(codes::INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found() -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "Method Not Found")
    }

    pub fn invalid_params() -> Self {
        Self::new(codes::INVALID_PARAMS, "Invalid Params")
    }

    pub fn internal_error() -> Self {
        Self::new(codes::INTERNAL_ERROR, "Internal Error")
    }

    pub fn request_cancelled() -> Self {
        Self::new(codes::REQUEST_CANCELLED, "Request Cancelled")
    }

    /// An error in the reserved server range. `code` must lie within
    /// -32099..=-32000.
    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        debug_assert!(is_server_error_code(code));
        Self::new(code, message)
    }

    /// Attach context to the default message, e.g.
    /// `ErrorObject::method_not_found().of("textDocument/frobnicate")`
    /// yields `"Method Not Found: textDocument/frobnicate"`.
    pub fn of(mut self, detail: impl std::fmt::Display) -> Self {
        self.message = format!("{}: {}", self.message, detail);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code {
            codes::PARSE_ERROR => ErrorKind::ParseError,
            codes::INVALID_REQUEST => ErrorKind::InvalidRequest,
            codes::METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
            codes::INVALID_PARAMS => ErrorKind::InvalidParams,
            codes::INTERNAL_ERROR => ErrorKind::InternalError,
            codes::REQUEST_CANCELLED => ErrorKind::RequestCancelled,
            c if is_server_error_code(c) => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }
}

fn is_server_error_code(code: i64) -> bool {
    (codes::SERVER_ERROR_START..=codes::SERVER_ERROR_END).contains(&code)
}

/// Errors raised by the framing codec and stream plumbing.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),
}

impl TransportError {
    /// Whether the fault is local to a single frame. Frame-local faults are
    /// skipped by the reader; anything else ends the read loop.
    pub fn is_frame_local(&self) -> bool {
        !matches!(self, TransportError::Io(_))
    }
}
