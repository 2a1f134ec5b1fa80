//! OCPP-J RPC framing
//!
//! Every frame on the wire is a JSON array:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
//!
//! The action is kept as a plain string here. Whether it names a known
//! message type is decided by the registry, not by the framing layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::HandlerError;
use crate::validate::{summarize, Violation};

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(alias = "FormationViolation")]
    FormatViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    #[serde(alias = "OccurenceConstraintViolation")]
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FormatViolation => "FormatViolation",
            ErrorCode::GenericError => "GenericError",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::MessageTypeNotSupported => "MessageTypeNotSupported",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::RpcFrameworkError => "RpcFrameworkError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
        }
    }

    /// Decode a wire error code. Unknown codes fall back to `GenericError`.
    pub fn from_wire(code: &str) -> Self {
        serde_json::from_value(Value::String(code.to_string())).unwrap_or(ErrorCode::GenericError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameErrorKind {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("frame is not a non-empty JSON array")]
    NotAnArray,

    #[error("message type id is not an integer")]
    BadMessageType,

    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("expected {expected} elements, got {actual}")]
    BadLength { expected: usize, actual: usize },

    #[error("field {0} has the wrong type")]
    BadField(&'static str),
}

/// A frame that could not be decoded.
///
/// Carries whatever could be recovered so the receiver can still answer
/// with a CALLERROR when the protocol allows it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed frame: {kind}")]
pub struct FrameError {
    pub message_type: Option<i64>,
    pub message_id: Option<String>,
    pub kind: FrameErrorKind,
}

impl FrameError {
    fn new(kind: FrameErrorKind) -> Self {
        Self {
            message_type: None,
            message_id: None,
            kind,
        }
    }

    /// The CALLERROR to send back, if any.
    ///
    /// Only malformed CALLs and unknown message types are answered; a broken
    /// CALLRESULT or CALLERROR is never replied to.
    pub fn reply(&self) -> Option<CallError> {
        let message_id = self.message_id.clone().filter(|id| !id.is_empty())?;
        match (&self.kind, self.message_type) {
            (FrameErrorKind::UnknownMessageType(t), _) => Some(CallError::new(
                message_id,
                ErrorCode::MessageTypeNotSupported,
                format!("message type {} is not supported", t),
            )),
            (kind, Some(t)) if t == MessageType::Call as i64 => Some(CallError::new(
                message_id,
                ErrorCode::FormatViolation,
                kind.to_string(),
            )),
            _ => None,
        }
    }
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Serialize to OCPP wire format: [2, messageId, action, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let array = serde_json::json!([
            MessageType::Call as i32,
            &self.message_id,
            &self.action,
            &self.payload
        ]);
        serde_json::to_vec(&array)
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
        }
    }

    /// Serialize to OCPP wire format: [3, messageId, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let array = serde_json::json!([
            MessageType::CallResult as i32,
            &self.message_id,
            &self.payload
        ]);
        serde_json::to_vec(&array)
    }

    /// Parse the payload as a specific response type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Reply for a payload that failed validation.
    ///
    /// The code comes from the first violation; the description lists all.
    pub fn from_violations(message_id: impl Into<String>, violations: &[Violation]) -> Self {
        let code = violations
            .first()
            .map(Violation::error_code)
            .unwrap_or(ErrorCode::FormatViolation);
        Self::new(message_id, code, summarize(violations))
    }

    pub fn from_handler(message_id: impl Into<String>, error: HandlerError) -> Self {
        Self {
            message_id: message_id.into(),
            error_code: error.code,
            error_description: error.description,
            error_details: error.details,
        }
    }

    /// Serialize to OCPP wire format: [4, messageId, errorCode, errorDescription, errorDetails]
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let array = serde_json::json!([
            MessageType::CallError as i32,
            &self.message_id,
            self.error_code.as_str(),
            &self.error_description,
            &self.error_details
        ]);
        serde_json::to_vec(&array)
    }
}

/// Parsed OCPP message (any type)
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Message {
    /// Parse an OCPP message from JSON bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| FrameError::new(FrameErrorKind::Json(e.to_string())))?;

        let array = match value {
            Value::Array(array) if !array.is_empty() => array,
            _ => return Err(FrameError::new(FrameErrorKind::NotAnArray)),
        };

        let msg_type = array[0]
            .as_i64()
            .ok_or_else(|| FrameError::new(FrameErrorKind::BadMessageType))?;

        // Recover the id early so that later failures can still be answered
        let message_id = array.get(1).and_then(Value::as_str).map(str::to_string);
        let fail = |kind| FrameError {
            message_type: Some(msg_type),
            message_id: message_id.clone(),
            kind,
        };

        let expected = match msg_type {
            2 => 4,
            3 => 3,
            4 => 5,
            other => return Err(fail(FrameErrorKind::UnknownMessageType(other))),
        };
        if array.len() != expected {
            return Err(fail(FrameErrorKind::BadLength {
                expected,
                actual: array.len(),
            }));
        }

        let id = match &message_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => return Err(fail(FrameErrorKind::BadField("messageId"))),
        };

        let mut fields = array.into_iter().skip(2);
        let mut next = || fields.next().unwrap_or(Value::Null);

        match msg_type {
            2 => {
                let action = match next() {
                    Value::String(action) if !action.is_empty() => action,
                    _ => return Err(fail(FrameErrorKind::BadField("action"))),
                };
                Ok(Message::Call(Call::new(id, action, next())))
            }
            3 => Ok(Message::CallResult(CallResult::new(id, next()))),
            _ => {
                let error_code = match next() {
                    Value::String(code) => ErrorCode::from_wire(&code),
                    _ => return Err(fail(FrameErrorKind::BadField("errorCode"))),
                };
                let error_description = match next() {
                    Value::String(description) => description,
                    _ => String::new(),
                };
                Ok(Message::CallError(CallError {
                    message_id: id,
                    error_code,
                    error_description,
                    error_details: next(),
                }))
            }
        }
    }

    /// Get the message ID
    pub fn message_id(&self) -> &str {
        match self {
            Message::Call(c) => &c.message_id,
            Message::CallResult(r) => &r.message_id,
            Message::CallError(e) => &e.message_id,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Message::Call(c) => c.to_bytes(),
            Message::CallResult(r) => r.to_bytes(),
            Message::CallError(e) => e.to_bytes(),
        }
    }
}
