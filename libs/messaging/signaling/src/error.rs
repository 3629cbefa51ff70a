//! Signaling error types
//!
//! A single error enum covers the three failure families of the endpoint
//! core: transient relay failures (retried by the next poll cycle),
//! contract violations caught when an endpoint is built or used, and
//! configuration problems.

use thiserror::Error;

/// Result alias for signaling operations
pub type Result<T> = std::result::Result<T, SignalError>;

#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// Request never completed (connect refused, timeout, body read failure)
    #[error("Transport error: {message} (url: {url})")]
    Transport { message: String, url: String },

    /// Relay answered with a non-success status
    #[error("Relay returned HTTP {status} for {url}")]
    RelayStatus { status: u16, url: String },

    /// Poll body was not JSON or had no `messages` array
    #[error("Malformed relay response: {0}")]
    MalformedResponse(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(String),

    /// Endpoint built without a message handler
    #[error("Endpoint '{0}' has no message handler")]
    MissingHandler(String),

    /// Endpoint built without a relay transport
    #[error("Endpoint '{0}' has no relay transport")]
    MissingRelay(String),

    /// `send` addressed to the sending endpoint
    #[error("Endpoint '{0}' cannot send to itself")]
    SelfAddressed(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No Tokio runtime available to host the loop or a send
    #[error("Runtime unavailable: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl SignalError {
    /// Failures the polling loop absorbs and retries on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SignalError::Transport { .. }
                | SignalError::RelayStatus { .. }
                | SignalError::MalformedResponse(_)
        )
    }

    /// Programming errors in how an endpoint was built or used
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SignalError::MissingHandler(_)
                | SignalError::MissingRelay(_)
                | SignalError::SelfAddressed(_)
                | SignalError::InvalidName(_)
        )
    }

    /// Create a transport error for a request against `url`
    pub fn transport(url: impl ToString, err: impl std::fmt::Display) -> Self {
        SignalError::Transport {
            message: err.to_string(),
            url: url.to_string(),
        }
    }

    /// Create a relay status error
    pub fn relay_status(status: u16, url: impl ToString) -> Self {
        SignalError::RelayStatus {
            status,
            url: url.to_string(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        SignalError::MalformedResponse(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        SignalError::InvalidConfig(msg.into())
    }

    pub fn invalid_name(msg: impl Into<String>) -> Self {
        SignalError::InvalidName(msg.into())
    }
}

impl From<std::io::Error> for SignalError {
    fn from(err: std::io::Error) -> Self {
        SignalError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SignalError {
    fn from(err: serde_json::Error) -> Self {
        SignalError::Serialization(err.to_string())
    }
}
