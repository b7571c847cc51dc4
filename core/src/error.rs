//! Error types for the dashboard API client.
//!
//! # Design
//! Every failure a caller can see is an `ApiError`, and every `ApiError`
//! answers `status()` and `message()`. Callers that only render a message or
//! branch on a status never need to match on variants. Failures that never
//! reached the server (transport, cancellation, local encode/decode) report
//! status 0.
//!
//! `ApiError` is `Clone` because one failed network call fans out to every
//! caller that joined it.

use thiserror::Error;

use crate::config::ConfigError;

/// Status reported for failures that produced no HTTP response.
pub const NO_STATUS: u16 = 0;

pub const TRANSPORT_MESSAGE: &str = "Unable to connect to server";
pub const CANCELLED_MESSAGE: &str = "Request cancelled";

/// Errors returned by `ApiClient`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server answered with a non-2xx status. `message` is the server's
    /// `detail` when it sent one.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never got a response (DNS, refused connection, timeout).
    #[error("Unable to connect to server: {detail}")]
    Transport { detail: String },

    /// The request was aborted through the client's cancellation registry.
    #[error("Request cancelled")]
    Cancelled,

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl ApiError {
    pub fn transport(err: TransportError) -> Self {
        ApiError::Transport {
            detail: err.to_string(),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ApiError::Http { status, .. } => *status,
            _ => NO_STATUS,
        }
    }

    /// User-facing message. Transport and cancellation errors use fixed text
    /// and leave the low-level cause to `Display`.
    pub fn message(&self) -> String {
        match self {
            ApiError::Http { message, .. } => message.clone(),
            ApiError::Transport { .. } => TRANSPORT_MESSAGE.to_string(),
            ApiError::Cancelled => CANCELLED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == 404
    }
}

/// Failure inside a `Transport` before any response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::new(format!("request timed out: {err}"));
        }
        TransportError::new(err.to_string())
    }
}

/// Failure while constructing an `ApiClient`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_exposes_status_and_detail() {
        let err = ApiError::Http {
            status: 422,
            message: "name is required".to_string(),
        };
        assert_eq!(err.status(), 422);
        assert_eq!(err.message(), "name is required");
        assert_eq!(err.to_string(), "HTTP 422: name is required");
    }

    #[test]
    fn transport_and_cancel_report_status_zero() {
        let transport = ApiError::transport(TransportError::new("connection refused"));
        assert_eq!(transport.status(), NO_STATUS);
        assert_eq!(transport.message(), TRANSPORT_MESSAGE);
        assert!(transport.to_string().contains("connection refused"));

        assert_eq!(ApiError::Cancelled.status(), NO_STATUS);
        assert_eq!(ApiError::Cancelled.message(), CANCELLED_MESSAGE);
        assert!(ApiError::Cancelled.is_cancelled());
    }

    #[test]
    fn not_found_is_a_status_check() {
        let err = ApiError::Http {
            status: 404,
            message: "Not found".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!ApiError::Cancelled.is_not_found());
    }
}
