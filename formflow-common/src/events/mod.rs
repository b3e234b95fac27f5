//! Event types and EventBus for formflow
//!
//! Every mutating command (download, inspect, template export, fill, case
//! persistence, workflows) reports what happened through the bus instead of
//! through its return value. Observers such as the SSE stream subscribe with
//! a pattern and receive matching events in publish order.

mod details;
mod reporter;

pub use details::{
    CaseAction, CaseDetail, DownloadDetail, EventDetail, EventFamily, FillDetail, InspectDetail,
    TemplateDetail, WorkflowDetail, WorkflowKind,
};
pub use reporter::OperationReporter;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

/// Lifecycle phase, the second segment of an event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    Started,
    Progress,
    Completed,
    Error,
}

impl EventPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPhase::Started => "started",
            EventPhase::Progress => "progress",
            EventPhase::Completed => "completed",
            EventPhase::Error => "error",
        }
    }

    /// `completed` and `error` end a command invocation
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventPhase::Completed | EventPhase::Error)
    }
}

/// Namespaced event type, e.g. `download.progress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType {
    pub family: EventFamily,
    pub phase: EventPhase,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.family.as_str(), self.phase.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Event payload: typed family detail plus the common progress fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventData {
    #[serde(flatten)]
    pub detail: EventDetail,
    /// Fixed-checkpoint completion percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Internal step that failed (error events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl EventData {
    pub fn new(detail: impl Into<EventDetail>) -> Self {
        Self {
            detail: detail.into(),
            percent: None,
            message: None,
            stage: None,
        }
    }
}

/// Published event
///
/// Serializes to `{ "type", "timestamp", "data", "error"? }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    /// Build an event; the family is taken from the payload
    pub fn new(phase: EventPhase, data: EventData) -> Self {
        Self {
            event_type: EventType {
                family: data.detail.family(),
                phase,
            },
            timestamp: Utc::now(),
            data,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Event type as string for filtering, e.g. `fill.completed`
    pub fn type_name(&self) -> String {
        self.event_type.to_string()
    }

    pub fn phase(&self) -> EventPhase {
        self.event_type.phase
    }

    pub fn family(&self) -> EventFamily {
        self.event_type.family
    }
}

/// Subscription pattern
///
/// `"*"` matches every type, `"prefix.*"` matches types starting with
/// `"prefix."`, anything else matches only that exact type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
    All,
    Prefix(String),
    Exact(String),
}

impl EventPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            EventPattern::All
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            if prefix.ends_with('.') && prefix.len() > 1 {
                EventPattern::Prefix(prefix.to_string())
            } else {
                EventPattern::Exact(pattern.to_string())
            }
        } else {
            EventPattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventPattern::All => true,
            EventPattern::Prefix(prefix) => event_type.starts_with(prefix.as_str()),
            EventPattern::Exact(exact) => event_type == exact,
        }
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPattern::All => f.write_str("*"),
            EventPattern::Prefix(prefix) => write!(f, "{}*", prefix),
            EventPattern::Exact(exact) => f.write_str(exact),
        }
    }
}

/// Identifier of one subscription on one bus
pub type SubscriptionId = u64;

/// Receiving end of a subscription
///
/// Yields matching events in publish order until the subscription is
/// removed with [`EventBus::unsubscribe`]; after that the buffered events
/// drain and `recv` returns `None`.
pub struct Subscription {
    id: SubscriptionId,
    pattern: EventPattern,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn pattern(&self) -> &EventPattern {
        &self.pattern
    }

    /// Wait for the next event; `None` once the channel is closed and drained
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next buffered event without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Drain every currently buffered event
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

struct SubscriberSlot {
    pattern: EventPattern,
    tx: mpsc::Sender<Event>,
}

struct BusInner {
    subscribers: Mutex<HashMap<SubscriptionId, SubscriberSlot>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

/// In-process publish/subscribe bus with pattern subscriptions
///
/// Each subscriber owns a bounded channel of `capacity` events. Publishing
/// never blocks: when a subscriber's buffer is full the event is dropped for
/// that subscriber only, so a slow UI consumer cannot stall a command.
///
/// # Examples
///
/// ```
/// use formflow_common::events::{DownloadDetail, Event, EventBus, EventData, EventPhase};
///
/// let bus = EventBus::new(100);
/// let mut sub = bus.subscribe("download.*");
///
/// bus.publish(Event::new(
///     EventPhase::Started,
///     EventData::new(DownloadDetail { form_code: "F3520".into(), ..Default::default() }),
/// ));
///
/// let event = sub.try_recv().unwrap();
/// assert_eq!(event.type_name(), "download.started");
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
            capacity: capacity.max(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<SubscriptionId, SubscriberSlot>> {
        // A panicking subscriber can't leave the map half-updated; keep going.
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to every future event whose type matches `pattern`
    pub fn subscribe(&self, pattern: &str) -> Subscription {
        let pattern = EventPattern::parse(pattern);
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.registry().insert(
            id,
            SubscriberSlot {
                pattern: pattern.clone(),
                tx,
            },
        );
        debug!(subscription = id, pattern = %pattern, "Subscribed to event bus");

        Subscription { id, pattern, rx }
    }

    /// Remove a subscription and close its channel
    ///
    /// Returns `false` (and does nothing) for unknown or already removed ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry().remove(&id).is_some();
        if removed {
            debug!(subscription = id, "Unsubscribed from event bus");
        }
        removed
    }

    /// Fan an event out to every matching subscriber
    ///
    /// Returns the number of subscribers that accepted the event.
    pub fn publish(&self, event: Event) -> usize {
        let event_type = event.type_name();
        let mut delivered = 0;
        let mut closed = Vec::new();

        let mut subscribers = self.registry();
        for (id, slot) in subscribers.iter() {
            if !slot.pattern.matches(&event_type) {
                continue;
            }
            match slot.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(subscription = id, event = %event_type, "Subscriber buffer full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            subscribers.remove(&id);
        }

        delivered
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }

    /// Get the configured per-subscriber capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped because a subscriber buffer was full
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}
