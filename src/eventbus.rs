//! Publish/subscribe event distribution across run, rerun, and global topics.
//!
//! Every stage of the harness (coordinator, executor, evaluator) publishes
//! progress as an [`Event`] rather than calling back into interested parties
//! directly. Subscribers attach to a topic and read a per-subscriber,
//! in-order stream; there is no ordering guarantee *across* subscribers or
//! topics, only within one subscriber's view of one topic.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Default bounded capacity of a subscriber's live broadcast queue.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Default number of events retained per topic for late-joining subscribers.
pub const DEFAULT_SNAPSHOT_LOG_LEN: usize = 1024;

/// The kind of event published to a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BatchStarted,
    BatchProgress,
    BatchRetry,
    BatchCompleted,
    BatchFailed,
    RunCompleted,
    RunFailed,
    RunCancelled,
    EvaluationStarted,
    EvaluationCompleted,
    EvaluationFailed,
    /// Synthetic marker inserted in place of events a lagging subscriber
    /// missed. Never itself dropped; carries the number of events skipped.
    Lag,
}

impl EventKind {
    /// Terminal events end a run's event stream; nothing follows them on
    /// `run/<run_id>` and they are never evicted from the snapshot log.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::RunCompleted | EventKind::RunFailed | EventKind::RunCancelled
        )
    }
}

/// One published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub run_id: String,
    pub batch_number: Option<u32>,
    /// Monotonic sequence number, unique within the event's topic.
    pub sequence: u64,
    /// Free-form structured payload (attempt counts, error text, etc.).
    pub payload: Value,
}

impl Event {
    fn lag(sequence: u64, skipped: u64) -> Self {
        Self {
            kind: EventKind::Lag,
            run_id: String::new(),
            batch_number: None,
            sequence,
            payload: serde_json::json!({ "skipped": skipped }),
        }
    }
}

/// A topic name: `run/<run_id>`, `batch_rerun/<run_id>`, or `global`.
pub fn run_topic(run_id: &str) -> String {
    format!("run/{run_id}")
}

/// Topic name for manual batch reruns on a given run.
pub fn batch_rerun_topic(run_id: &str) -> String {
    format!("batch_rerun/{run_id}")
}

/// The well-known global topic, fed a copy of every event regardless of
/// which run it concerns.
pub const GLOBAL_TOPIC: &str = "global";

struct Topic {
    sender: broadcast::Sender<Event>,
    log: VecDeque<Event>,
    next_sequence: u64,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            log: VecDeque::new(),
            next_sequence: 0,
        }
    }

    fn publish(&mut self, mut event: Event, log_len: usize) {
        event.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.log.push_back(event.clone());
        while self.log.len() > log_len && !self.log.front().map(|e| e.kind.is_terminal()).unwrap_or(false) {
            self.log.pop_front();
        }
        // broadcast::Sender::send fails only when there are no receivers;
        // that's a normal and expected condition for a topic nobody has
        // subscribed to yet, not an error.
        let _ = self.sender.send(event);
    }

    fn snapshot_from(&self, cursor: Option<u64>) -> Vec<Event> {
        match cursor {
            Some(seq) => self
                .log
                .iter()
                .filter(|e| e.sequence > seq)
                .cloned()
                .collect(),
            None => self.log.iter().cloned().collect(),
        }
    }
}

/// A cursor into a topic's snapshot log, used to resume a subscription
/// (e.g. after a reconnect) without missing or replaying events.
pub type Cursor = u64;

/// A subscription handle: a snapshot of events the subscriber hasn't seen
/// yet, followed by a live receiver for events published from now on.
pub struct Subscription {
    pub snapshot: Vec<Event>,
    pub receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, translating a lagged broadcast receiver
    /// into a synthetic [`EventKind::Lag`] marker instead of an error.
    pub async fn recv(&mut self) -> Event {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Event::lag(0, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Event::lag(0, 0);
                }
            }
        }
    }
}

/// The event bus: a registry of topics, each independently ordered and
/// independently bounded.
pub struct EventBus {
    subscriber_capacity: usize,
    snapshot_log_len: usize,
    topics: Mutex<HashMap<String, Topic>>,
}

impl EventBus {
    /// Builds a bus with the default capacities.
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_SUBSCRIBER_CAPACITY, DEFAULT_SNAPSHOT_LOG_LEN)
    }

    /// Builds a bus with explicit per-subscriber and snapshot-log capacities.
    pub fn with_capacities(subscriber_capacity: usize, snapshot_log_len: usize) -> Self {
        Self {
            subscriber_capacity,
            snapshot_log_len,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes an event to `topic`, and additionally mirrors it onto
    /// [`GLOBAL_TOPIC`] unless it is already the global topic.
    pub fn publish(&self, topic: &str, event: Event) {
        let mut topics = self.topics.lock().expect("event bus mutex poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(self.subscriber_capacity))
            .publish(event.clone(), self.snapshot_log_len);

        if topic != GLOBAL_TOPIC {
            topics
                .entry(GLOBAL_TOPIC.to_string())
                .or_insert_with(|| Topic::new(self.subscriber_capacity))
                .publish(event, self.snapshot_log_len);
        }
    }

    /// Subscribes to a topic, optionally resuming from a prior cursor.
    /// A subscriber with no cursor gets the full retained snapshot first,
    /// then tails the live stream.
    pub fn subscribe(&self, topic: &str, cursor: Option<Cursor>) -> Subscription {
        let mut topics = self.topics.lock().expect("event bus mutex poisoned");
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(self.subscriber_capacity));
        Subscription {
            snapshot: entry.snapshot_from(cursor),
            receiver: entry.sender.subscribe(),
        }
    }

    /// The highest sequence number observed on `topic`, for callers that
    /// want to record a cursor without consuming a subscription.
    pub fn latest_cursor(&self, topic: &str) -> Option<Cursor> {
        let topics = self.topics.lock().expect("event bus mutex poisoned");
        topics.get(topic).and_then(|t| t.log.back()).map(|e| e.sequence)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, run_id: &str) -> Event {
        Event {
            kind,
            run_id: run_id.to_string(),
            batch_number: None,
            sequence: 0,
            payload: Value::Null,
        }
    }

    #[tokio::test]
    async fn subscriber_sees_publication_order() {
        let bus = EventBus::new();
        let topic = run_topic("r1");
        let mut sub = bus.subscribe(&topic, None);
        bus.publish(&topic, ev(EventKind::BatchStarted, "r1"));
        bus.publish(&topic, ev(EventKind::BatchCompleted, "r1"));
        assert_eq!(sub.recv().await.kind, EventKind::BatchStarted);
        assert_eq!(sub.recv().await.kind, EventKind::BatchCompleted);
    }

    #[tokio::test]
    async fn late_subscriber_gets_snapshot_then_tail() {
        let bus = EventBus::new();
        let topic = run_topic("r2");
        bus.publish(&topic, ev(EventKind::BatchStarted, "r2"));
        bus.publish(&topic, ev(EventKind::BatchCompleted, "r2"));

        let sub = bus.subscribe(&topic, None);
        assert_eq!(sub.snapshot.len(), 2);
        assert_eq!(sub.snapshot[0].kind, EventKind::BatchStarted);
    }

    #[tokio::test]
    async fn cursor_resume_only_returns_newer_events() {
        let bus = EventBus::new();
        let topic = run_topic("r3");
        bus.publish(&topic, ev(EventKind::BatchStarted, "r3"));
        let cursor = bus.latest_cursor(&topic);
        bus.publish(&topic, ev(EventKind::BatchCompleted, "r3"));

        let sub = bus.subscribe(&topic, cursor);
        assert_eq!(sub.snapshot.len(), 1);
        assert_eq!(sub.snapshot[0].kind, EventKind::BatchCompleted);
    }

    #[tokio::test]
    async fn terminal_event_is_never_evicted() {
        let bus = EventBus::with_capacities(DEFAULT_SUBSCRIBER_CAPACITY, 2);
        let topic = run_topic("r4");
        bus.publish(&topic, ev(EventKind::BatchStarted, "r4"));
        bus.publish(&topic, ev(EventKind::RunCompleted, "r4"));
        bus.publish(&topic, ev(EventKind::BatchStarted, "r4"));
        bus.publish(&topic, ev(EventKind::BatchStarted, "r4"));

        let sub = bus.subscribe(&topic, None);
        assert!(sub.snapshot.iter().any(|e| e.kind == EventKind::RunCompleted));
    }

    #[tokio::test]
    async fn global_topic_mirrors_run_topic_events() {
        let bus = EventBus::new();
        let topic = run_topic("r5");
        bus.publish(&topic, ev(EventKind::BatchStarted, "r5"));

        let sub = bus.subscribe(GLOBAL_TOPIC, None);
        assert_eq!(sub.snapshot.len(), 1);
        assert_eq!(sub.snapshot[0].run_id, "r5");
    }
}
