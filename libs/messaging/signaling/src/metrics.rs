//! Per-endpoint counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by the poll loop and by `send`
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub polls_started: AtomicU64,
    pub polls_completed: AtomicU64,
    pub polls_failed: AtomicU64,
    pub messages_dispatched: AtomicU64,
    pub sends_attempted: AtomicU64,
    pub sends_delivered: AtomicU64,
    pub sends_failed: AtomicU64,
}

impl EndpointStats {
    pub fn record_poll_started(&self) {
        self.polls_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A poll request returned a batch, before any of it is dispatched
    pub fn record_poll_completed(&self) {
        self.polls_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failed(&self) {
        self.polls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_attempted(&self) {
        self.sends_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_result(&self, delivered: bool) {
        if delivered {
            self.sends_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sends_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            polls_started: self.polls_started.load(Ordering::Relaxed),
            polls_completed: self.polls_completed.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            sends_attempted: self.sends_attempted.load(Ordering::Relaxed),
            sends_delivered: self.sends_delivered.load(Ordering::Relaxed),
            sends_failed: self.sends_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub polls_started: u64,
    pub polls_completed: u64,
    pub polls_failed: u64,
    pub messages_dispatched: u64,
    pub sends_attempted: u64,
    pub sends_delivered: u64,
    pub sends_failed: u64,
}

impl StatsSnapshot {
    /// Share of finished polls that failed, 0.0 before the first poll ends
    pub fn poll_failure_rate(&self) -> f64 {
        let finished = self.polls_completed + self.polls_failed;
        if finished == 0 {
            return 0.0;
        }
        self.polls_failed as f64 / finished as f64
    }
}
