//! Relay message types
//!
//! Inbound messages arrive in batches from `GET /poll/{name}`; outbound
//! messages are addressed by path (`/send/{from}/{target}/{operation}`) and
//! carry only the encoded payload in the request body.

use crate::{Result, SignalError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Encoded body sent when `send` is given no payload
pub const EMPTY_PAYLOAD: &str = "\"\"";

/// One relayed request from a remote endpoint
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboundMessage {
    /// Name of the sending endpoint
    pub from: String,

    /// Operation the sender wants executed
    pub method: String,

    /// Opaque payload, `null` when the relay omits it
    #[serde(default)]
    pub data: Value,
}

impl InboundMessage {
    pub fn new(from: impl Into<String>, method: impl Into<String>, data: Value) -> Self {
        Self {
            from: from.into(),
            method: method.into(),
            data,
        }
    }
}

/// Body of a poll response
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PollResponse {
    pub messages: Vec<InboundMessage>,
}

impl PollResponse {
    /// Parse a poll body; anything without a `messages` array is malformed
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| SignalError::malformed(e.to_string()))
    }
}

/// One outbound request, payload already encoded for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    from: String,
    target: String,
    operation: String,
    payload: String,
}

impl OutboundMessage {
    /// Build and encode an outbound message.
    ///
    /// `None` encodes as [`EMPTY_PAYLOAD`] so the relay always receives a body.
    pub fn new(
        from: impl Into<String>,
        target: impl Into<String>,
        operation: impl Into<String>,
        data: Option<&Value>,
    ) -> Result<Self> {
        let from = from.into();
        let target = target.into();
        let operation = operation.into();

        validate_name("sender", &from)?;
        validate_name("target", &target)?;
        validate_name("operation", &operation)?;
        if target == from {
            return Err(SignalError::SelfAddressed(from));
        }

        let payload = match data {
            Some(value) => serde_json::to_string(value)?,
            None => EMPTY_PAYLOAD.to_string(),
        };

        Ok(Self {
            from,
            target,
            operation,
            payload,
        })
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// JSON-encoded request body
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decode the payload back into a JSON value
    pub fn data(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Relay path for this message, without the base URL
    pub fn path(&self) -> String {
        format!("/send/{}/{}/{}", self.from, self.target, self.operation)
    }
}

/// Endpoint names and operations become URL path segments. They must be
/// non-blank, and `.`/`..` are refused because URL normalization would drop
/// them from the path.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(SignalError::invalid_name(format!("{} cannot be empty", kind)));
    }
    if name == "." || name == ".." {
        return Err(SignalError::invalid_name(format!(
            "{} cannot be a dot segment, got '{}'",
            kind, name
        )));
    }
    Ok(())
}
