//! src/eventbus/mod.rs
//!
//! Process-wide log bus: one bounded ring buffer per topic for replay,
//! plus live fanout to bounded subscriber queues. Sequence numbers are
//! assigned under a single short-lived lock; fanout never blocks, and a
//! subscriber whose queue is full is dropped rather than allowed to
//! stall the publisher.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use afkbot_common::models::log::{LogEntry, LogFrame, LogSnapshot};
use afkbot_common::models::platform::Platform;

/// Retained entries per topic.
const RING_CAPACITY: usize = 300;

/// Per-subscriber queue depth. A subscriber this far behind is treated
/// as disconnected.
const SUBSCRIBER_QUEUE: usize = 200;

/// Idle interval after which a live subscription yields a keep-alive
/// frame, so half-open consumers surface.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Messages containing any of these markers are mirrored to the
/// process-level diagnostic output.
const SEVERITY_MARKERS: [&str; 6] = ["error", "fail", "exception", "stuck", "warn", "timeout"];

struct TopicState {
    next_seq: u64,
    ring: VecDeque<LogEntry>,
    subscribers: Vec<mpsc::Sender<LogEntry>>,
}

impl TopicState {
    fn new() -> Self {
        Self {
            next_seq: 0,
            ring: VecDeque::with_capacity(RING_CAPACITY),
            subscribers: Vec::new(),
        }
    }
}

pub struct LogBus {
    topics: Mutex<HashMap<Platform, TopicState>>,
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Append a line to `topic`. Sequence assignment and ring insertion
    /// happen under the lock; delivery to subscribers happens after it
    /// is released, via `try_send` only.
    pub fn append(&self, topic: Platform, message: impl Into<String>) -> LogEntry {
        let message = message.into();
        let entry;
        let senders: Vec<mpsc::Sender<LogEntry>>;
        {
            let mut topics = self.topics.lock();
            let state = topics.entry(topic).or_insert_with(TopicState::new);
            entry = LogEntry {
                topic,
                seq: state.next_seq,
                timestamp: Utc::now(),
                message,
            };
            state.next_seq += 1;
            if state.ring.len() == RING_CAPACITY {
                state.ring.pop_front();
            }
            state.ring.push_back(entry.clone());
            senders = state.subscribers.clone();
        }

        let mut dead = Vec::new();
        for tx in &senders {
            if tx.try_send(entry.clone()).is_err() {
                dead.push(tx.clone());
            }
        }
        if !dead.is_empty() {
            let mut topics = self.topics.lock();
            if let Some(state) = topics.get_mut(&topic) {
                state
                    .subscribers
                    .retain(|s| !dead.iter().any(|d| d.same_channel(s)));
            }
        }

        let lowered = entry.message.to_lowercase();
        if SEVERITY_MARKERS.iter().any(|m| lowered.contains(m)) {
            warn!("[{}] {}", topic, entry.message);
        }

        entry
    }

    /// Retained entries with `seq > after_seq` (all retained entries
    /// when `after_seq` is `None`), plus the last assigned seq so the
    /// caller can resume from there.
    pub fn snapshot(&self, topic: Platform, after_seq: Option<u64>) -> LogSnapshot {
        let topics = self.topics.lock();
        match topics.get(&topic) {
            Some(state) => LogSnapshot {
                entries: state
                    .ring
                    .iter()
                    .filter(|e| after_seq.is_none_or(|a| e.seq > a))
                    .cloned()
                    .collect(),
                last_seq: state.next_seq.checked_sub(1),
            },
            None => LogSnapshot {
                entries: Vec::new(),
                last_seq: None,
            },
        }
    }

    /// Attach a live subscription to `topic`.
    pub fn subscribe(&self, topic: Platform) -> LogStream {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut topics = self.topics.lock();
        topics
            .entry(topic)
            .or_insert_with(TopicState::new)
            .subscribers
            .push(tx);
        LogStream { rx }
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: Platform) -> usize {
        self.topics
            .lock()
            .get(&topic)
            .map(|s| s.subscribers.len())
            .unwrap_or(0)
    }
}

/// Live view of one topic. Idle periods are reported as keep-alive
/// frames so the consumer can distinguish "quiet" from "gone".
pub struct LogStream {
    rx: mpsc::Receiver<LogEntry>,
}

impl LogStream {
    /// `None` means the bus dropped this subscriber (queue overflow) or
    /// the bus itself went away.
    pub async fn next_frame(&mut self) -> Option<LogFrame> {
        match tokio::time::timeout(KEEPALIVE_INTERVAL, self.rx.recv()).await {
            Ok(Some(entry)) => Some(LogFrame::Entry(entry)),
            Ok(None) => None,
            Err(_elapsed) => Some(LogFrame::KeepAlive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn seq_is_gapless_and_survives_eviction() {
        let bus = LogBus::new();
        for i in 0..RING_CAPACITY + 50 {
            bus.append(Platform::HyperHub, format!("line {i}"));
        }

        let snap = bus.snapshot(Platform::HyperHub, None);
        assert_eq!(snap.entries.len(), RING_CAPACITY);
        assert_eq!(snap.last_seq, Some((RING_CAPACITY + 50 - 1) as u64));

        // Oldest 50 were evicted; what's left is still gapless.
        assert_eq!(snap.entries[0].seq, 50);
        for pair in snap.entries.windows(2) {
            assert_eq!(pair[1].seq, pair[0].seq + 1);
        }
    }

    #[tokio::test]
    async fn snapshot_filters_already_seen_entries() {
        let bus = LogBus::new();
        for i in 0..10 {
            bus.append(Platform::Altare, format!("line {i}"));
        }
        let snap = bus.snapshot(Platform::Altare, Some(6));
        let seqs: Vec<u64> = snap.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![7, 8, 9]);
        assert_eq!(snap.last_seq, Some(9));

        let empty = bus.snapshot(Platform::Overnode, None);
        assert!(empty.entries.is_empty());
        assert_eq!(empty.last_seq, None);
    }

    #[tokio::test]
    async fn full_subscriber_is_dropped_without_stalling_others() {
        let bus = LogBus::new();
        let stalled = bus.subscribe(Platform::Overnode);
        let healthy = bus.subscribe(Platform::Overnode);
        assert_eq!(bus.subscriber_count(Platform::Overnode), 2);

        // Overflow the stalled subscriber's queue. append() must return
        // promptly every time; the healthy reader drains as it goes.
        let reader = tokio::spawn(async move {
            let mut seen = 0usize;
            let mut healthy = healthy;
            while let Some(LogFrame::Entry(_)) =
                timeout(Duration::from_secs(5), healthy.next_frame())
                    .await
                    .expect("healthy subscriber must keep receiving")
            {
                seen += 1;
                if seen == SUBSCRIBER_QUEUE + 10 {
                    break;
                }
            }
            seen
        });

        for i in 0..SUBSCRIBER_QUEUE + 10 {
            bus.append(Platform::Overnode, format!("burst {i}"));
            tokio::task::yield_now().await;
        }

        let seen = reader.await.unwrap();
        assert_eq!(seen, SUBSCRIBER_QUEUE + 10);
        assert_eq!(bus.subscriber_count(Platform::Overnode), 1);
        drop(stalled);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_subscription_yields_keepalive() {
        let bus = LogBus::new();
        let mut stream = bus.subscribe(Platform::HyperHub);

        let frame = stream.next_frame().await;
        assert_eq!(frame, Some(LogFrame::KeepAlive));

        bus.append(Platform::HyperHub, "hello");
        match stream.next_frame().await {
            Some(LogFrame::Entry(e)) => assert_eq!(e.message, "hello"),
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn topics_are_sequenced_independently() {
        let bus = LogBus::new();
        bus.append(Platform::HyperHub, "a");
        bus.append(Platform::Altare, "b");
        bus.append(Platform::HyperHub, "c");

        let hh = bus.snapshot(Platform::HyperHub, None);
        let al = bus.snapshot(Platform::Altare, None);
        assert_eq!(
            hh.entries.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(al.entries[0].seq, 0);
    }
}
