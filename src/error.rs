//! Error type shared by every layer of the runtime.

use serde_json::Value;
use thiserror::Error;

/// Error type for transport, registration and hook operations.
///
/// Every waiter of a shared in-flight request receives its own clone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The server answered with a non-success status and a structured payload.
    #[error("Request failed with status {status}: {payload}")]
    Transport { status: u16, payload: Value },

    /// The server answered with a non-success status and an empty body.
    #[error("Request failed with status {status}")]
    Http { status: u16 },

    /// No response was received (connection, timeout or body read failure).
    #[error("Network error: {0}")]
    Network(String),

    /// Arguments or a response body did not match the expected type.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request could not be materialized (bad URL or header).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Duplicate endpoint key '{key}' in namespace '{namespace}'")]
    DuplicateEndpointKey { namespace: String, key: String },

    #[error("Duplicate endpoint name '{name}' in namespace '{namespace}'")]
    DuplicateEndpointName { namespace: String, name: String },

    #[error("Unknown hook: {0}")]
    UnknownHook(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Hook '{hook}' is not a {expected} endpoint")]
    EndpointKindMismatch { hook: String, expected: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Returns the server-provided payload of a [`ApiError::Transport`] error.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        match self {
            Self::Transport { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Returns the HTTP status for errors that carry one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } | Self::Http { status } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for errors raised while building a registry.
    #[must_use]
    pub const fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateEndpointKey { .. } | Self::DuplicateEndpointName { .. }
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
