//! Endpoints and their transport loop
//!
//! An [`Endpoint`] is a named local participant. Once started it runs a
//! fixed-interval poll loop against its relay and hands every inbound
//! message, in batch order, to its [`MessageHandler`]. Outbound messages go
//! through [`Endpoint::send`], which never blocks on the relay.
//!
//! ## Loop lifecycle
//!
//! ```text
//!   start() ──► idle ──tick──► polling ──batch dispatched──► idle
//!                 │                                            │
//!                 └──────────── stop() / last handle dropped ──┴──► stopped
//! ```
//!
//! Each tick spawns its own cycle task, so a slow relay delays only that
//! cycle and overlapping polls are allowed. Dispatch is serialized: a fetched
//! batch waits for the dispatch lock and is handed over whole, batches in the
//! order their polls completed. Failed cycles are logged and the next tick
//! polls again; there is no backoff.

use crate::config::RelayConfig;
use crate::directory::EndpointDirectory;
use crate::message::{validate_name, InboundMessage, OutboundMessage};
use crate::metrics::{EndpointStats, StatsSnapshot};
use crate::relay::RelayTransport;
use crate::{Result, SignalError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Poll interval used when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Endpoint-specific handling of inbound messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called once per inbound message, in the order the relay returned them.
    /// Calls for one endpoint never overlap.
    ///
    /// `endpoint` is the receiving endpoint, so handlers can reply with
    /// [`Endpoint::send`]. Calling [`Endpoint::poll_once`] on that same
    /// endpoint from here deadlocks.
    async fn receive(&self, endpoint: &Endpoint, from: &str, operation: &str, data: Value);
}

/// Handle to a named endpoint; clones share the same loop and counters
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    name: String,
    relay: Arc<dyn RelayTransport>,
    handler: Arc<dyn MessageHandler>,
    poll_interval: Duration,
    stats: EndpointStats,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    /// FIFO lock held while a batch is dispatched
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl Endpoint {
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// True when both handles refer to the same endpoint instance
    pub fn ptr_eq(&self, other: &Endpoint) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start the poll loop. Calling it on a running endpoint is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| SignalError::Runtime(e.to_string()))?;

        let mut task = self.inner.poll_task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(endpoint = %self.inner.name, "Poll loop already running");
            return Ok(());
        }

        let span = info_span!("endpoint", name = %self.inner.name);
        let handle = runtime.spawn(
            run_poll_loop(Arc::downgrade(&self.inner), self.inner.poll_interval).instrument(span),
        );
        *task = Some(handle);

        info!(
            endpoint = %self.inner.name,
            relay = %self.inner.relay.describe(),
            poll_interval_ms = self.inner.poll_interval.as_millis() as u64,
            "Endpoint started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .poll_task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the poll loop and every in-flight cycle
    pub async fn stop(&self) {
        let task = self.inner.poll_task.lock().take();
        let Some(handle) = task else {
            debug!(endpoint = %self.inner.name, "Stop requested but loop not running");
            return;
        };

        handle.abort();
        match handle.await {
            Err(e) if !e.is_cancelled() => {
                warn!(endpoint = %self.inner.name, "Poll loop finished with error: {}", e);
            }
            _ => debug!(endpoint = %self.inner.name, "Poll loop cancelled"),
        }

        info!(endpoint = %self.inner.name, "Endpoint stopped");
    }

    /// Run one poll cycle: fetch the queued batch and dispatch it in order.
    ///
    /// Returns the number of messages dispatched. The loop calls this on
    /// every tick; callers may also drive it directly. Concurrent calls fetch
    /// in parallel but dispatch one batch at a time, in fetch completion order.
    pub async fn poll_once(&self) -> Result<usize> {
        self.inner.stats.record_poll_started();

        let batch = match self.inner.relay.poll(&self.inner.name).await {
            Ok(batch) => batch,
            Err(e) => {
                self.inner.stats.record_poll_failed();
                return Err(e);
            }
        };
        self.inner.stats.record_poll_completed();

        let count = batch.len();
        let _dispatching = self.inner.dispatch_lock.lock().await;
        for message in batch {
            self.dispatch(message).await;
        }

        Ok(count)
    }

    async fn dispatch(&self, message: InboundMessage) {
        debug!(
            endpoint = %self.inner.name,
            from = %message.from,
            method = %message.method,
            "Dispatching inbound message"
        );
        self.inner.stats.record_message_dispatched();
        self.inner
            .handler
            .receive(self, &message.from, &message.method, message.data)
            .await;
    }

    /// Send `operation` with optional `data` to the remote endpoint `target`.
    ///
    /// The request runs on its own task; the returned handle resolves once
    /// the relay call finishes. Relay failures are logged and counted, never
    /// returned. Errors here only cover bad addressing (self-send, blank
    /// names) and a missing runtime.
    pub fn send(
        &self,
        target: &str,
        operation: &str,
        data: Option<Value>,
    ) -> Result<JoinHandle<()>> {
        let message = OutboundMessage::new(self.name(), target, operation, data.as_ref())?;
        let runtime = Handle::try_current().map_err(|e| SignalError::Runtime(e.to_string()))?;

        info!(
            endpoint = %self.inner.name,
            to = target,
            operation,
            payload = message.payload(),
            "Sending"
        );
        self.inner.stats.record_send_attempted();

        let inner = Arc::clone(&self.inner);
        Ok(runtime.spawn(async move {
            match inner.relay.post(&message).await {
                Ok(()) => {
                    inner.stats.record_send_result(true);
                    debug!(endpoint = %inner.name, path = %message.path(), "Send accepted by relay");
                }
                Err(e) => {
                    inner.stats.record_send_result(false);
                    warn!(
                        endpoint = %inner.name,
                        to = message.target(),
                        operation = message.operation(),
                        error = %e,
                        "Send failed"
                    );
                }
            }
        }))
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.name)
            .field("relay", &self.inner.relay)
            .field("poll_interval", &self.inner.poll_interval)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_poll_loop(weak: Weak<EndpointInner>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = weak.upgrade() else {
                    debug!("All endpoint handles dropped, poll loop exiting");
                    break;
                };
                let endpoint = Endpoint { inner };
                cycles.spawn(
                    async move {
                        if let Err(e) = endpoint.poll_once().await {
                            warn!(error = %e, transient = e.is_transient(), "Poll cycle failed");
                        }
                    }
                    .in_current_span(),
                );
            }
            Some(finished) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Poll cycle panicked: {}", e);
                    }
                }
            }
        }
    }
}

/// Builder for [`Endpoint`]; a handler and a relay are required
pub struct EndpointBuilder {
    name: String,
    relay: Option<Arc<dyn RelayTransport>>,
    handler: Option<Arc<dyn MessageHandler>>,
    poll_interval: Duration,
}

impl EndpointBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relay: None,
            handler: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn handler<H: MessageHandler + 'static>(self, handler: H) -> Self {
        self.shared_handler(Arc::new(handler))
    }

    pub fn shared_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn relay<R: RelayTransport + 'static>(self, relay: R) -> Self {
        self.shared_relay(Arc::new(relay))
    }

    pub fn shared_relay(mut self, relay: Arc<dyn RelayTransport>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Take the poll interval from relay configuration
    pub fn with_config(self, config: &RelayConfig) -> Self {
        self.poll_interval(config.poll_interval())
    }

    /// Validate and build a stopped endpoint
    pub fn build(self) -> Result<Endpoint> {
        validate_name("endpoint name", &self.name)?;

        if self.poll_interval.is_zero() {
            return Err(SignalError::invalid_config(
                "Poll interval must be greater than 0",
            ));
        }

        let handler = self
            .handler
            .ok_or_else(|| SignalError::MissingHandler(self.name.clone()))?;
        let relay = self
            .relay
            .ok_or_else(|| SignalError::MissingRelay(self.name.clone()))?;

        Ok(Endpoint {
            inner: Arc::new(EndpointInner {
                name: self.name,
                relay,
                handler,
                poll_interval: self.poll_interval,
                stats: EndpointStats::default(),
                poll_task: Mutex::new(None),
                dispatch_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Build, start the poll loop and register in `directory`.
    ///
    /// A previous endpoint under the same name is replaced in the directory
    /// but keeps running; stop it through the handle from
    /// [`EndpointDirectory::register`] if needed.
    pub fn spawn(self, directory: &EndpointDirectory) -> Result<Endpoint> {
        let endpoint = self.build()?;
        endpoint.start()?;

        if directory.register(endpoint.clone()).is_some() {
            debug!(endpoint = %endpoint.name(), "Replaced existing directory entry");
        }

        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryRelay, RecordingHandler};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn endpoint(name: &str, relay: &MemoryRelay, handler: &RecordingHandler) -> Endpoint {
        Endpoint::builder(name)
            .relay(relay.clone())
            .handler(handler.clone())
            .build()
            .unwrap()
    }

    /// Replies to every `offer` with an `answer` carrying the same payload
    struct AnsweringHandler {
        recorder: RecordingHandler,
    }

    #[async_trait]
    impl MessageHandler for AnsweringHandler {
        async fn receive(&self, endpoint: &Endpoint, from: &str, operation: &str, data: Value) {
            self.recorder
                .receive(endpoint, from, operation, data.clone())
                .await;
            if operation == "offer" {
                if let Ok(handle) = endpoint.send(from, "answer", Some(data)) {
                    let _ = handle.await;
                }
            }
        }
    }

    /// Records on entry and takes `delay` to handle operation `slow_op`
    struct SlowHandler {
        recorder: RecordingHandler,
        slow_op: &'static str,
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl SlowHandler {
        fn new(recorder: &RecordingHandler, slow_op: &'static str, delay: Duration) -> Self {
            Self {
                recorder: recorder.clone(),
                slow_op,
                delay,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for SlowHandler {
        async fn receive(&self, endpoint: &Endpoint, from: &str, operation: &str, data: Value) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            self.recorder.receive(endpoint, from, operation, data).await;
            if operation == self.slow_op {
                tokio::time::sleep(self.delay).await;
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Memory relay whose first poll hangs for `stall` after draining its queue
    #[derive(Debug)]
    struct StallingRelay {
        inner: MemoryRelay,
        stall: Duration,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl RelayTransport for StallingRelay {
        async fn poll(&self, endpoint: &str) -> Result<Vec<InboundMessage>> {
            let batch = self.inner.poll(endpoint).await?;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(self.stall).await;
            }
            Ok(batch)
        }

        async fn post(&self, message: &OutboundMessage) -> Result<()> {
            self.inner.post(message).await
        }

        fn describe(&self) -> String {
            "stalling memory relay".to_string()
        }
    }

    /// Panics on `boom`, records everything else
    struct PanickingHandler {
        recorder: RecordingHandler,
    }

    #[async_trait]
    impl MessageHandler for PanickingHandler {
        async fn receive(&self, endpoint: &Endpoint, from: &str, operation: &str, data: Value) {
            if operation == "boom" {
                panic!("handler failed on {}", from);
            }
            self.recorder.receive(endpoint, from, operation, data).await;
        }
    }

    fn ops(handler: &RecordingHandler) -> Vec<String> {
        handler.received().into_iter().map(|m| m.method).collect()
    }

    #[test]
    fn test_build_requires_handler() {
        let result = Endpoint::builder("V1").relay(MemoryRelay::new()).build();
        assert!(matches!(result, Err(SignalError::MissingHandler(name)) if name == "V1"));
    }

    #[test]
    fn test_build_requires_relay() {
        let result = Endpoint::builder("V1")
            .handler(RecordingHandler::new())
            .build();
        assert!(matches!(result, Err(SignalError::MissingRelay(_))));
    }

    #[test]
    fn test_build_rejects_blank_name_and_zero_interval() {
        let result = Endpoint::builder("")
            .relay(MemoryRelay::new())
            .handler(RecordingHandler::new())
            .build();
        assert!(matches!(result, Err(SignalError::InvalidName(_))));

        let result = Endpoint::builder("..")
            .relay(MemoryRelay::new())
            .handler(RecordingHandler::new())
            .build();
        assert!(matches!(result, Err(SignalError::InvalidName(_))));

        let result = Endpoint::builder("V1")
            .relay(MemoryRelay::new())
            .handler(RecordingHandler::new())
            .poll_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(SignalError::InvalidConfig(_))));
    }

    #[test]
    fn test_start_outside_runtime() {
        let ep = endpoint("V1", &MemoryRelay::new(), &RecordingHandler::new());
        assert!(matches!(ep.start(), Err(SignalError::Runtime(_))));
        assert!(!ep.is_running());
    }

    #[tokio::test]
    async fn test_dispatch_preserves_batch_order() {
        let relay = MemoryRelay::new();
        let handler = RecordingHandler::new();
        let ep = endpoint("E", &relay, &handler);

        relay.enqueue("E", InboundMessage::new("A", "m1", json!(1)));
        relay.enqueue("E", InboundMessage::new("B", "m2", json!({"k": "v"})));
        relay.enqueue("E", InboundMessage::new("A", "m3", Value::Null));

        assert_eq!(ep.poll_once().await.unwrap(), 3);

        let received = handler.received();
        assert_eq!(
            received,
            vec![
                InboundMessage::new("A", "m1", json!(1)),
                InboundMessage::new("B", "m2", json!({"k": "v"})),
                InboundMessage::new("A", "m3", Value::Null),
            ]
        );
        assert_eq!(ep.stats().messages_dispatched, 3);
    }

    #[tokio::test]
    async fn test_empty_poll_dispatches_nothing() {
        let relay = MemoryRelay::new();
        let handler = RecordingHandler::new();
        let ep = endpoint("E", &relay, &handler);

        assert_eq!(ep.poll_once().await.unwrap(), 0);
        assert_eq!(handler.count(), 0);
        assert_eq!(relay.poll_count("E"), 1);
        assert_eq!(ep.stats().polls_completed, 1);
    }

    #[tokio::test]
    async fn test_failed_poll_is_reported_and_counted() {
        let relay = MemoryRelay::new();
        let handler = RecordingHandler::new();
        let ep = endpoint("E", &relay, &handler);

        relay.enqueue("E", InboundMessage::new("A", "ping", Value::Null));
        relay.fail_next_polls(1);

        let err = ep.poll_once().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(handler.count(), 0);

        // Queued message survives the failed cycle
        assert_eq!(ep.poll_once().await.unwrap(), 1);

        let stats = ep.stats();
        assert_eq!(stats.polls_failed, 1);
        assert_eq!(stats.polls_completed, 1);
    }

    #[tokio::test]
    async fn test_send_rejects_self_address() {
        let relay = MemoryRelay::new();
        let ep = endpoint("V1", &relay, &RecordingHandler::new());

        let result = ep.send("V1", "offer", None);
        assert!(matches!(result, Err(SignalError::SelfAddressed(_))));
        assert!(relay.posted().is_empty());
        assert_eq!(ep.stats().sends_attempted, 0);
    }

    #[tokio::test]
    async fn test_send_payload_framing() {
        let relay = MemoryRelay::new();
        let ep = endpoint("A", &relay, &RecordingHandler::new());

        ep.send("B", "ping", None).unwrap().await.unwrap();
        ep.send("B", "ping", Some(json!({"x": 1})))
            .unwrap()
            .await
            .unwrap();

        let posted = relay.posted();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].payload(), "\"\"");
        assert_eq!(posted[0].path(), "/send/A/B/ping");
        assert_eq!(posted[1].data().unwrap(), json!({"x": 1}));
        assert_eq!(ep.stats().sends_delivered, 2);
    }

    #[tokio::test]
    async fn test_send_failure_is_not_raised() {
        let relay = MemoryRelay::new();
        let ep = endpoint("A", &relay, &RecordingHandler::new());
        relay.fail_sends(true);

        let handle = ep.send("B", "hangup", None).unwrap();
        tokio_test::assert_ok!(handle.await);

        let stats = ep.stats();
        assert_eq!(stats.sends_attempted, 1);
        assert_eq!(stats.sends_failed, 1);
        assert_eq!(relay.pending("B"), 0);
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let relay = MemoryRelay::new();
        let recorder = RecordingHandler::new();
        let v1 = Endpoint::builder("V1")
            .relay(relay.clone())
            .handler(AnsweringHandler {
                recorder: recorder.clone(),
            })
            .build()
            .unwrap();

        let offer = json!({"sdp": "v=0 offer"});
        relay.enqueue("V1", InboundMessage::new("V2", "offer", offer.clone()));

        assert_eq!(v1.poll_once().await.unwrap(), 1);
        assert_eq!(
            recorder.received(),
            vec![InboundMessage::new("V2", "offer", offer.clone())]
        );

        let posted = relay.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].path(), "/send/V1/V2/answer");
        assert_eq!(posted[0].data().unwrap(), offer);
        assert_eq!(relay.pending("V2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failed_cycles() {
        let relay = MemoryRelay::new();
        let handler = RecordingHandler::new();
        let directory = EndpointDirectory::new();

        let ep = Endpoint::builder("V1")
            .relay(relay.clone())
            .handler(handler.clone())
            .poll_interval(Duration::from_secs(1))
            .spawn(&directory)
            .unwrap();
        assert!(ep.is_running());

        relay.enqueue("V1", InboundMessage::new("V2", "offer", json!({"sdp": "x"})));
        relay.fail_next_polls(2);

        // Ticks at 1s, 2s and 3s; the first two fail
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(relay.poll_count("V1"), 3);
        assert_eq!(handler.count(), 1);

        let stats = ep.stats();
        assert_eq!(stats.polls_failed, 2);
        assert_eq!(stats.polls_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let relay = MemoryRelay::new();
        let ep = endpoint("V1", &relay, &RecordingHandler::new());
        ep.start().unwrap();
        // Second start is a no-op
        ep.start().unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(relay.poll_count("V1"), 2);

        ep.stop().await;
        assert!(!ep.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(relay.poll_count("V1"), 2);

        // Stopping twice is harmless
        ep.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_when_endpoint_dropped() {
        let relay = MemoryRelay::new();
        let ep = endpoint("V1", &relay, &RecordingHandler::new());
        ep.start().unwrap();
        drop(ep);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(relay.poll_count("V1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_finishes_batch_before_next() {
        let relay = MemoryRelay::new();
        let recorder = RecordingHandler::new();
        let directory = EndpointDirectory::new();

        relay.enqueue("V1", InboundMessage::new("V2", "a1", Value::Null));
        relay.enqueue("V1", InboundMessage::new("V2", "a2", Value::Null));

        let _ep = Endpoint::builder("V1")
            .relay(relay.clone())
            .handler(SlowHandler::new(&recorder, "a1", Duration::from_millis(1500)))
            .poll_interval(Duration::from_secs(1))
            .spawn(&directory)
            .unwrap();

        // a1 is dispatched at 1s and holds the handler until 2.5s
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ops(&recorder), vec!["a1"]);
        relay.enqueue("V1", InboundMessage::new("V3", "b1", Value::Null));

        // The 2s tick fetches b1 while a1 is still being handled
        tokio::time::sleep(Duration::from_millis(1700)).await;
        assert_eq!(relay.poll_count("V1"), 3);
        assert_eq!(ops(&recorder), vec!["a1", "a2", "b1"]);

        directory.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_poll_once_never_overlaps_handler() {
        let relay = MemoryRelay::new();
        let recorder = RecordingHandler::new();
        let handler = Arc::new(SlowHandler::new(&recorder, "a1", Duration::from_secs(1)));
        let ep = Endpoint::builder("V1")
            .relay(relay.clone())
            .shared_handler(handler.clone())
            .build()
            .unwrap();

        relay.enqueue("V1", InboundMessage::new("V2", "a1", Value::Null));
        relay.enqueue("V1", InboundMessage::new("V2", "a2", Value::Null));
        let first = tokio::spawn({
            let ep = ep.clone();
            async move { ep.poll_once().await }
        });
        // Let the first cycle fetch and enter the slow handler
        tokio::time::sleep(Duration::from_millis(10)).await;

        relay.enqueue("V1", InboundMessage::new("V3", "b1", Value::Null));
        assert_eq!(ep.poll_once().await.unwrap(), 1);
        assert_eq!(first.await.unwrap().unwrap(), 2);

        assert_eq!(ops(&recorder), vec!["a1", "a2", "b1"]);
        assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_poll_does_not_block_later_ticks() {
        let memory = MemoryRelay::new();
        let recorder = RecordingHandler::new();
        let directory = EndpointDirectory::new();

        memory.enqueue("V1", InboundMessage::new("V2", "a1", Value::Null));

        let ep = Endpoint::builder("V1")
            .relay(StallingRelay {
                inner: memory.clone(),
                stall: Duration::from_millis(3500),
                stalled: AtomicBool::new(false),
            })
            .handler(recorder.clone())
            .poll_interval(Duration::from_secs(1))
            .spawn(&directory)
            .unwrap();

        // First poll drains a1 at 1s and hangs until 4.5s
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(memory.poll_count("V1"), 1);
        memory.enqueue("V1", InboundMessage::new("V3", "b1", Value::Null));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(memory.poll_count("V1"), 2);
        assert_eq!(ops(&recorder), vec!["b1"]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(memory.poll_count("V1"), 3);
        assert_eq!(ops(&recorder), vec!["b1"]);

        // Batches are dispatched in the order their polls completed
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(memory.poll_count("V1"), 4);
        assert_eq!(ops(&recorder), vec!["b1", "a1"]);

        let stats = ep.stats();
        assert_eq!(stats.polls_started, 4);
        assert_eq!(stats.polls_completed, 4);
        assert_eq!(stats.messages_dispatched, 2);

        directory.shutdown().await;
    }

    #[tokio::test]
    async fn test_handler_panic_mid_batch_keeps_counts() {
        let relay = MemoryRelay::new();
        let recorder = RecordingHandler::new();
        let ep = Endpoint::builder("V1")
            .relay(relay.clone())
            .handler(PanickingHandler {
                recorder: recorder.clone(),
            })
            .build()
            .unwrap();

        relay.enqueue("V1", InboundMessage::new("V2", "ok", Value::Null));
        relay.enqueue("V1", InboundMessage::new("V2", "boom", Value::Null));
        relay.enqueue("V1", InboundMessage::new("V2", "unreached", Value::Null));

        let cycle = tokio::spawn({
            let ep = ep.clone();
            async move { ep.poll_once().await }
        });
        assert!(cycle.await.unwrap_err().is_panic());

        let stats = ep.stats();
        assert_eq!(stats.polls_completed, 1);
        assert_eq!(stats.polls_failed, 0);
        assert_eq!(stats.messages_dispatched, 2);
        assert_eq!(ops(&recorder), vec!["ok"]);

        // Dispatch lock is released by the unwinding cycle
        relay.enqueue("V1", InboundMessage::new("V2", "after", Value::Null));
        assert_eq!(ep.poll_once().await.unwrap(), 1);
        assert_eq!(ep.stats().messages_dispatched, 3);
    }
}
