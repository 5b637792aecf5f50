//! Broadcast bus for asynchronous status updates.
//!
//! Every subscriber owns a bounded queue. Publishing never blocks: when a
//! queue is full its oldest event is discarded, and the subscriber's next
//! read yields a single `events_dropped` marker carrying the count before
//! the surviving events.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Notify;

use ava_domain::capability::CapabilityResult;
use ava_domain::provider::HealthChange;
use ava_domain::turn::Turn;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `{event, session_id, payload, ts}` as sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    pub session_id: Option<String>,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

impl EventEnvelope {
    fn new(event: &str, session_id: Option<&str>, payload: Value) -> Self {
        Self {
            event: event.to_owned(),
            session_id: session_id.map(str::to_owned),
            payload,
            ts: Utc::now(),
        }
    }

    pub fn turn_appended(session_id: &str, turn: &Turn) -> Self {
        Self::new(
            "turn_appended",
            Some(session_id),
            json!({
                "turn_index": turn.turn_index,
                "role": turn.role,
                "tag": turn.tag,
                "text": turn.text,
            }),
        )
    }

    pub fn status_changed(session_id: &str, status: &str) -> Self {
        Self::new("status_changed", Some(session_id), json!({ "status": status }))
    }

    pub fn provider_health_changed(change: &HealthChange) -> Self {
        Self::new(
            "provider_health_changed",
            None,
            json!({ "provider": change.provider, "from": change.from, "to": change.to }),
        )
    }

    pub fn capability_started(session_id: &str, kind: &str) -> Self {
        Self::new("capability_started", Some(session_id), json!({ "kind": kind }))
    }

    pub fn capability_finished(session_id: &str, result: &CapabilityResult) -> Self {
        Self::new(
            "capability_finished",
            Some(session_id),
            json!({
                "kind": result.kind,
                "success": result.success,
                "duration_ms": result.duration_ms,
                "error": result.error,
            }),
        )
    }

    pub fn session_expired(session_id: &str, reason: &str) -> Self {
        Self::new("session_expired", Some(session_id), json!({ "reason": reason }))
    }

    fn events_dropped(count: u64) -> Self {
        Self::new("events_dropped", None, json!({ "dropped": count }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Outbox {
    events: VecDeque<EventEnvelope>,
    dropped: u64,
}

struct Subscriber {
    /// Only events for this session are delivered when set.
    filter: Mutex<Option<String>>,
    outbox: Mutex<Outbox>,
    ready: Notify,
}

impl Subscriber {
    fn wants(&self, event: &EventEnvelope) -> bool {
        match (self.filter.lock().as_deref(), event.session_id.as_deref()) {
            (None, _) | (_, None) => true,
            (Some(want), Some(got)) => want == got,
        }
    }
}

pub struct EventBus {
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl EventBus {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(Subscriber {
            filter: Mutex::new(None),
            outbox: Mutex::new(Outbox::default()),
            ready: Notify::new(),
        });
        self.subscribers.lock().insert(id, inner.clone());
        Subscription {
            id,
            bus: self.clone(),
            inner,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver `event` to every interested subscriber. Never blocks.
    pub fn publish(&self, event: EventEnvelope) {
        let targets: Vec<Arc<Subscriber>> = self.subscribers.lock().values().cloned().collect();
        for sub in targets {
            if !sub.wants(&event) {
                continue;
            }
            {
                let mut outbox = sub.outbox.lock();
                outbox.events.push_back(event.clone());
                while outbox.events.len() > self.queue_depth {
                    outbox.events.pop_front();
                    outbox.dropped += 1;
                }
            }
            sub.ready.notify_one();
        }
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Arc<EventBus>,
    inner: Arc<Subscriber>,
}

impl Subscription {
    /// Restrict delivery to one session, or lift the restriction.
    pub fn set_filter(&self, session_id: Option<String>) {
        *self.inner.filter.lock() = session_id;
    }

    /// Next pending event without waiting.
    pub fn try_next(&self) -> Option<EventEnvelope> {
        let mut outbox = self.inner.outbox.lock();
        if outbox.dropped > 0 {
            let count = std::mem::take(&mut outbox.dropped);
            return Some(EventEnvelope::events_dropped(count));
        }
        outbox.events.pop_front()
    }

    /// Wait for the next event.
    pub async fn next(&self) -> EventEnvelope {
        loop {
            if let Some(event) = self.try_next() {
                return event;
            }
            self.inner.ready.notified().await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(session: &str, n: usize) -> EventEnvelope {
        EventEnvelope::status_changed(session, &format!("s{n}"))
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = Arc::new(EventBus::new(16));
        let sub = bus.subscribe();
        for i in 0..3 {
            bus.publish(status("a", i));
        }
        for i in 0..3 {
            assert_eq!(sub.next().await.payload["status"], format!("s{i}"));
        }
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn overflow_drops_oldest_and_emits_one_marker() {
        let bus = Arc::new(EventBus::new(4));
        let sub = bus.subscribe();
        for i in 0..10 {
            bus.publish(status("a", i));
        }

        let marker = sub.try_next().unwrap();
        assert_eq!(marker.event, "events_dropped");
        assert_eq!(marker.payload["dropped"], 6);

        let rest: Vec<_> = std::iter::from_fn(|| sub.try_next()).collect();
        assert_eq!(rest.len(), 4);
        assert_eq!(rest[0].payload["status"], "s6");
        assert!(rest.iter().all(|e| e.event == "status_changed"));
    }

    #[test]
    fn filter_limits_session_events_but_not_global_ones() {
        let bus = Arc::new(EventBus::new(16));
        let sub = bus.subscribe();
        sub.set_filter(Some("a".into()));

        bus.publish(status("b", 0));
        bus.publish(status("a", 1));
        bus.publish(EventEnvelope::provider_health_changed(&HealthChange {
            provider: "p1".into(),
            from: ava_domain::provider::ProviderHealth::Healthy,
            to: ava_domain::provider::ProviderHealth::Degraded,
        }));

        assert_eq!(sub.try_next().unwrap().session_id.as_deref(), Some("a"));
        assert_eq!(sub.try_next().unwrap().event, "provider_health_changed");
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let bus = Arc::new(EventBus::new(16));
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn next_wakes_on_publish() {
        let bus = Arc::new(EventBus::new(16));
        let sub = bus.subscribe();
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(status("a", 7));
        });
        let ev = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap();
        assert_eq!(ev.payload["status"], "s7");
    }
}
