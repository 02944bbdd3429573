// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire protocol between a conduit service and the gateway.
//!
//! A [`Frame`] is the only unit ever sent over the transport. All three
//! variants are tagged so the gateway can dispatch on `type` without any
//! out-of-band framing.
//!
//! ```text
//! Service                              Gateway
//!    │── Request {id, method, params} ────►│  routes by method, remembers id
//!    │◄─ Response {id, ok, payload} ───────│
//!    │                                      │
//!    │── Event {source, event, payload} ──►│  assigns seq, fans out
//!    │◄─ Event {seq, ...} ──────────────────│  (to every subscriber)
//! ```

mod ids;
pub mod registration;

pub use ids::RequestIdGenerator;
pub use registration::ServiceRegistration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes returned in [`Frame::Response::error`].
///
/// The four taxonomy codes are bit-exact strings on the wire; services may
/// also pass through their own error strings verbatim via [`ErrorCode::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ErrorCode {
    ParseError,
    NoHandler,
    ServiceUnavailable,
    Timeout,
    RegisterFailed,
    Custom(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::NoHandler => "NO_HANDLER",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RegisterFailed => "REGISTER_FAILED",
            ErrorCode::Custom(s) => s.as_str(),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(e: ErrorCode) -> String {
        e.as_str().to_string()
    }
}

impl From<String> for ErrorCode {
    fn from(s: String) -> ErrorCode {
        match s.as_str() {
            "PARSE_ERROR" => ErrorCode::ParseError,
            "NO_HANDLER" => ErrorCode::NoHandler,
            "SERVICE_UNAVAILABLE" => ErrorCode::ServiceUnavailable,
            "TIMEOUT" => ErrorCode::Timeout,
            "REGISTER_FAILED" => ErrorCode::RegisterFailed,
            other => ErrorCode::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The error payload carried by a failed [`Frame::Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameError {
    pub code: ErrorCode,
    pub message: String,
}

impl FrameError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// One routed unit of communication: a request, a response, or an event.
///
/// Unknown fields in a deserialized frame are tolerated (serde's default
/// behaviour); missing required fields surface as a typed [`ProtocolError`]
/// at the decode boundary rather than panicking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: String,
        target: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Response {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<FrameError>,
    },
    Event {
        source: String,
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        /// Assigned by the gateway; zero until fan-out, never trusted from
        /// the emitter.
        #[serde(default)]
        seq: u64,
    },
}

impl Frame {
    pub fn request(id: impl Into<String>, target: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Frame::Request {
            id: id.into(),
            target: target.into(),
            method: method.into(),
            params,
        }
    }

    pub fn response_ok(id: impl Into<String>, payload: Option<Value>) -> Self {
        Frame::Response {
            id: id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    pub fn response_err(id: impl Into<String>, error: FrameError) -> Self {
        Frame::Response {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    pub fn event(source: impl Into<String>, event: impl Into<String>, payload: Option<Value>) -> Self {
        Frame::Event {
            source: source.into(),
            event: event.into(),
            payload,
            seq: 0,
        }
    }
}

/// Error produced when a frame cannot be parsed off the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid frame CBOR (encode): {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("invalid frame CBOR (decode): {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Parse a JSON-text frame. Callers (the gateway) turn a parse failure into
/// a `PARSE_ERROR` response rather than propagating it further.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Serialize a frame to JSON text for the wire.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Encode a frame to CBOR bytes (used by transports that prefer compact
/// binary framing, e.g. the MCP bridge's internal plumbing).
pub fn encode_cbor(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::into_writer(frame, &mut buf)?;
    Ok(buf)
}

/// Decode a frame from CBOR bytes.
pub fn decode_cbor(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    Ok(ciborium::from_reader(bytes)?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
