//! Error types for the gateway.
//!
//! Every failure that crosses the connector boundary is expressed as a
//! [`GatewayError`]. Transport-specific failures live in
//! [`crate::transport::TransportError`] and are translated here, so the
//! dispatcher and its callers never see OS or HTTP level error types.

use std::time::Duration;

use strum::{Display, EnumString};
use thiserror::Error;

use crate::transport::TransportError;

/// Primary error type for all gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Failed to connect to service '{service}': {message}")]
    ConnectFailed { service: String, message: String },

    #[error("Service '{service}' timed out after {}ms during {operation}", .elapsed.as_millis())]
    Timeout {
        service: String,
        operation: String,
        elapsed: Duration,
    },

    #[error("Connection to service '{service}' lost: {message}")]
    ConnectionLost {
        service: String,
        message: String,
        stderr: Option<String>,
    },

    #[error("Malformed response from service '{service}': {message}")]
    MalformedResponse { service: String, message: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },
}

/// Fieldless classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ConfigInvalid,
    ConnectFailed,
    Timeout,
    ConnectionLost,
    MalformedResponse,
    NotFound,
    ToolFailed,
}

impl GatewayError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigInvalid(message.into())
    }

    pub fn connect_failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn timeout(
        service: impl Into<String>,
        operation: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self::Timeout {
            service: service.into(),
            operation: operation.into(),
            elapsed,
        }
    }

    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Translate a transport failure that happened while a call was in flight.
    pub fn from_transport(service: &str, error: TransportError) -> Self {
        match error {
            TransportError::Spawn { .. } => Self::connect_failed(service, error.to_string()),
            TransportError::Closed { stderr } => Self::ConnectionLost {
                service: service.to_owned(),
                message: "transport closed".into(),
                stderr,
            },
            other => Self::ConnectionLost {
                service: service.to_owned(),
                message: other.to_string(),
                stderr: None,
            },
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::MalformedResponse { .. } | Self::InvalidArguments { .. } => {
                ErrorKind::MalformedResponse
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ToolFailed { .. } => ErrorKind::ToolFailed,
        }
    }

    /// Whether a fresh attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectFailed | ErrorKind::Timeout | ErrorKind::ConnectionLost
        )
    }

    /// Captured stderr of the tool process, when the failure carried any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ConnectionLost { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GatewayError>;
