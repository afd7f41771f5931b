//! # Framework Errors
//!
//! This module defines the error type shared by every layer of the RPC runtime:
//! plugin composition, the middleware pipeline, protocol dispatch and the
//! session transport.
//!
//! Errors are `Clone` because a transport that closes must reject every pending
//! receiver with the *same* error value.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors that can occur within the RPC runtime.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RpcError {
    /// Malformed plugin wiring or a missing collaborator.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller sent something the protocol cannot accept.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A query template and its values disagree on arity.
    #[error("Parameter count mismatch: expected {expected}, got {actual}")]
    ParamCount { expected: usize, actual: usize },

    /// No exposed or internal method matches the requested path.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// Rejected by an authorization hook.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Application-level failure raised inside an exposed method.
    #[error("{0}")]
    Execution(String),

    /// The storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The session transport is closed.
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// A connection state change that the state machine forbids.
    #[error("Invalid connection transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RpcError {
    /// Shorthand for application code returning an execution failure.
    pub fn execution(message: impl Into<String>) -> Self {
        RpcError::Execution(message.into())
    }

    /// Stable wire code carried in protocol and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::UnknownMethod(_) => "UNKNOWN_METHOD",
            RpcError::Unauthorized(_) => "UNAUTHORIZED",
            RpcError::Validation(_) | RpcError::ParamCount { .. } | RpcError::Serialization(_) => {
                "VALIDATION_ERROR"
            }
            RpcError::Configuration(_) => "CONFIGURATION_ERROR",
            RpcError::TransportClosed(_) => "TRANSPORT_CLOSED",
            RpcError::Execution(_) | RpcError::Storage(_) | RpcError::InvalidTransition { .. } => {
                "RPC_ERROR"
            }
        }
    }

    /// HTTP status used when the error crosses the HTTP boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::UnknownMethod(_) => StatusCode::NOT_FOUND,
            RpcError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RpcError::Validation(_) | RpcError::ParamCount { .. } | RpcError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            RpcError::TransportClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured form sent to remote callers instead of the raw error.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Serialization(e.to_string())
    }
}

/// `{code, message}` pair carried by protocol responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
