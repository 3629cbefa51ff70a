use crate::endpoint::{Endpoint, MessageHandler};
use crate::message::{InboundMessage, OutboundMessage};
use crate::relay::RelayTransport;
use crate::{Result, SignalError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// In-process relay with per-name queues, for tests and local demos.
///
/// Posted messages are recorded and queued for the target's next poll, so
/// several endpoints sharing one `MemoryRelay` can talk to each other.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<MemoryRelayState>>,
}

#[derive(Debug, Default)]
struct MemoryRelayState {
    queues: HashMap<String, VecDeque<InboundMessage>>,
    posted: Vec<OutboundMessage>,
    poll_counts: HashMap<String, usize>,
    failing_polls: usize,
    fail_sends: bool,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for `target`'s next poll
    pub fn enqueue(&self, target: &str, message: InboundMessage) {
        self.state
            .lock()
            .queues
            .entry(target.to_string())
            .or_default()
            .push_back(message);
    }

    /// Make the next `count` polls fail with a transport error
    pub fn fail_next_polls(&self, count: usize) {
        self.state.lock().failing_polls = count;
    }

    /// Make every post fail until reset
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Every message accepted through `post`, in order
    pub fn posted(&self) -> Vec<OutboundMessage> {
        self.state.lock().posted.clone()
    }

    /// Number of polls made for `endpoint`, failed ones included
    pub fn poll_count(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .poll_counts
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Messages waiting for `target`
    pub fn pending(&self, target: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(target)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    async fn poll(&self, endpoint: &str) -> Result<Vec<InboundMessage>> {
        let mut state = self.state.lock();
        *state.poll_counts.entry(endpoint.to_string()).or_default() += 1;

        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(SignalError::transport(
                format!("memory://relay/poll/{}", endpoint),
                "Simulated poll failure",
            ));
        }

        Ok(state
            .queues
            .get_mut(endpoint)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }

    async fn post(&self, message: &OutboundMessage) -> Result<()> {
        let data = message.data()?;
        let mut state = self.state.lock();

        if state.fail_sends {
            return Err(SignalError::transport(
                format!("memory://relay{}", message.path()),
                "Simulated send failure",
            ));
        }

        state.posted.push(message.clone());
        state
            .queues
            .entry(message.target().to_string())
            .or_default()
            .push_back(InboundMessage::new(
                message.from(),
                message.operation(),
                data,
            ));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory relay".to_string()
    }
}

/// Handler that records every dispatched message
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    received: Arc<Mutex<Vec<InboundMessage>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<InboundMessage> {
        self.received.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn receive(&self, _endpoint: &Endpoint, from: &str, operation: &str, data: Value) {
        self.received
            .lock()
            .push(InboundMessage::new(from, operation, data));
    }
}
