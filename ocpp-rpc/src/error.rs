//! Error types shared across the engine
//!
//! Every failure an engine operation can surface maps onto a wire
//! [`ErrorCode`] so it can be put into a CALLERROR frame when needed.

use serde_json::Value;
use thiserror::Error;

use crate::messages::ErrorCode;
use crate::registry::Role;
use crate::validate::{summarize, Violation};

/// Catalog and handler binding errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("message type {name} from profile {profile} is already registered by profile {existing}")]
    DuplicateMessageType {
        name: String,
        existing: String,
        profile: String,
    },

    #[error("profile {0} is already registered with different features")]
    ConflictingProfile(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("{role} never receives {action}")]
    WrongReceiver { action: String, role: Role },
}

/// Failures of the transport collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection {0} is not open")]
    NotConnected(String),

    #[error("connection {0} closed")]
    Closed(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Business error returned by a role handler.
///
/// Converted verbatim into a CALLERROR; never tears the connection down.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {description}")]
pub struct HandlerError {
    pub code: ErrorCode,
    pub description: String,
    pub details: Value,
}

impl HandlerError {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::new(
            ErrorCode::NotImplemented,
            format!("no handler for {}", action),
        )
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, description)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::new(ErrorCode::FormatViolation, e.to_string())
    }
}

/// Errors visible to a caller of the engine
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("action {0} is not registered")]
    NotRegistered(String),

    #[error("{role} may not send {action}")]
    RoleMismatch { action: String, role: Role },

    #[error("connection {0} already has a call in flight")]
    AlreadyPending(String),

    #[error("validation failed: {}", summarize(.0))]
    ValidationFailed(Vec<Violation>),

    #[error("timed out waiting for response")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,

    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    #[error("connection {0} closed")]
    Disconnected(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{code} from peer: {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    /// Wire error code this failure maps onto
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RpcError::NotRegistered(_) => ErrorCode::NotImplemented,
            RpcError::RoleMismatch { .. } => ErrorCode::NotSupported,
            RpcError::ValidationFailed(violations) => violations
                .first()
                .map(Violation::error_code)
                .unwrap_or(ErrorCode::FormatViolation),
            RpcError::Remote { code, .. } => *code,
            RpcError::Json(_) => ErrorCode::FormatViolation,
            RpcError::Transport(_) => ErrorCode::InternalError,
            RpcError::AlreadyPending(_)
            | RpcError::Timeout
            | RpcError::Cancelled
            | RpcError::UnknownConnection(_)
            | RpcError::Disconnected(_) => ErrorCode::GenericError,
        }
    }
}
