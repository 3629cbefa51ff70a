//! Name-Addressed Signaling Endpoints
//!
//! Transport-agnostic signaling core for peer-addressed clients. Each
//! participant is a named [`Endpoint`] that exchanges named, opaque-payload
//! messages with remote endpoints through a shared relay. Handlers never see
//! how messages travel; swapping the [`RelayTransport`] leaves them untouched.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐          ┌──────────────────────┐
//! │   EndpointDirectory      │          │        Relay         │
//! │   name → Endpoint        │          │  (queues per name)   │
//! │                          │          │                      │
//! │  ┌────────────────────┐  │  poll    │  GET  /poll/{name}   │
//! │  │ Endpoint "V1"      │◄─┼──────────┼──                    │
//! │  │  loop: tick → poll │  │          │                      │
//! │  │  → MessageHandler  │──┼──────────┼─►POST /send/{from}/  │
//! │  └────────────────────┘  │  send    │    {target}/{op}     │
//! └──────────────────────────┘          └──────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use signaling::{Endpoint, EndpointDirectory, HttpRelay, MessageHandler};
//!
//! struct Callee;
//!
//! #[async_trait]
//! impl MessageHandler for Callee {
//!     async fn receive(&self, endpoint: &Endpoint, from: &str, operation: &str, data: Value) {
//!         if operation == "offer" {
//!             let _ = endpoint.send(from, "answer", Some(data));
//!         }
//!     }
//! }
//!
//! # async fn run() -> signaling::Result<()> {
//! let directory = EndpointDirectory::new();
//! Endpoint::builder("V1")
//!     .relay(HttpRelay::new("https://localhost:8000")?)
//!     .handler(Callee)
//!     .spawn(&directory)?;
//!
//! if let Some(v1) = directory.lookup("V1") {
//!     v1.send("V2", "offer", Some(json!({"sdp": "..."})))?;
//! }
//!
//! directory.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod metrics;
pub mod relay;
pub mod test_utils;

pub use config::{RelayConfig, SignalingConfig};
pub use directory::EndpointDirectory;
pub use endpoint::{Endpoint, EndpointBuilder, MessageHandler, DEFAULT_POLL_INTERVAL};
pub use error::{Result, SignalError};
pub use message::{InboundMessage, OutboundMessage, PollResponse, EMPTY_PAYLOAD};
pub use metrics::{EndpointStats, StatsSnapshot};
pub use relay::{HttpRelay, RelayTransport};
