//! Relay transports
//!
//! The endpoint core only ever talks to a relay through [`RelayTransport`],
//! so swapping HTTP polling for another mechanism leaves handlers untouched.

pub mod http;

use crate::message::{InboundMessage, OutboundMessage};
use crate::Result;
use async_trait::async_trait;
use std::fmt::Debug;

pub use http::HttpRelay;

/// A relay that queues messages per endpoint name
#[async_trait]
pub trait RelayTransport: Send + Sync + Debug {
    /// Dequeue the batch of messages waiting for `endpoint`, in arrival order
    async fn poll(&self, endpoint: &str) -> Result<Vec<InboundMessage>>;

    /// Hand one message to the relay for the target's next poll
    async fn post(&self, message: &OutboundMessage) -> Result<()>;

    /// Short transport description for logs
    fn describe(&self) -> String {
        "relay".to_string()
    }
}
