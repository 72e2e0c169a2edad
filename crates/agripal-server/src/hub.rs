//! Real-time fanout of stored readings to live subscribers.
//!
//! The hub is a registry of bounded per-subscriber queues. Its lock is
//! separate from the store's and is always taken first (registry, then
//! store). Ingestion goes through [`DistributionHub::publish`], which holds
//! the registry lock across the store update and the fanout, and
//! [`DistributionHub::subscribe`] holds it across the snapshot and the
//! registration. Together these give each subscriber every reading exactly
//! once: either inside its initial snapshot or as a live event, in the order
//! the store accepted them.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use agripal_store::TelemetryStore;
use agripal_types::{DeviceSample, LiveEvent, SensorKey, SensorReading};
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Identifies one live subscriber for the lifetime of the process.
pub type SubscriberId = u64;

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlowConsumerPolicy {
    /// Evict the subscriber. Its session ends once the queue drains and the
    /// client re-syncs from a fresh snapshot when it reconnects.
    #[default]
    Disconnect,
    /// Skip the event for that subscriber only.
    Drop,
}

/// Tuning for the hub.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Events buffered per subscriber before the slow-consumer policy applies.
    pub queue_capacity: usize,
    pub slow_consumer: SlowConsumerPolicy,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            slow_consumer: SlowConsumerPolicy::Disconnect,
        }
    }
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriberId, mpsc::Sender<LiveEvent>>,
    next_id: SubscriberId,
    closed: bool,
}

struct HubInner {
    store: TelemetryStore,
    settings: HubSettings,
    registry: Mutex<Registry>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offers `event` to one queue. Returns whether the subscriber stays registered.
    fn offer(&self, id: SubscriberId, tx: &mpsc::Sender<LiveEvent>, event: LiveEvent) -> bool {
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = id, "removing subscriber with closed queue");
                false
            }
            Err(TrySendError::Full(event)) => match self.settings.slow_consumer {
                SlowConsumerPolicy::Disconnect => {
                    tracing::warn!(
                        subscriber = id,
                        capacity = self.settings.queue_capacity,
                        "disconnecting slow consumer"
                    );
                    false
                }
                SlowConsumerPolicy::Drop => {
                    tracing::warn!(
                        subscriber = id,
                        event = event.name(),
                        "dropping event for slow consumer"
                    );
                    true
                }
            },
        }
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "subscriber left");
        }
        removed
    }
}

/// Fans out readings to live subscribers. Cheap to clone.
#[derive(Clone)]
pub struct DistributionHub {
    inner: Arc<HubInner>,
}

impl DistributionHub {
    pub fn new(store: TelemetryStore, settings: HubSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                settings,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// The store this hub publishes into.
    pub fn store(&self) -> &TelemetryStore {
        &self.inner.store
    }

    /// Registers a subscriber whose first event is the initial snapshot.
    ///
    /// After [`close`](Self::close) the returned subscription is already
    /// finished.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.settings.queue_capacity.max(1));
        let mut registry = self.inner.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        let subscription = Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        };
        if registry.closed {
            return subscription;
        }

        let snapshot = self.inner.store.list_latest();
        let sensors = snapshot.len();
        if self.inner.offer(id, &tx, LiveEvent::InitialData { data: snapshot }) {
            registry.subscribers.insert(id, tx);
        }
        tracing::debug!(subscriber = id, sensors, "subscriber joined");
        subscription
    }

    /// Stores `sample` and delivers the stored reading to every subscriber.
    ///
    /// The store update completes before any subscriber can see the event.
    pub fn publish(&self, topic: &str, sample: DeviceSample) -> SensorReading {
        let mut registry = self.inner.lock();
        let reading = self.inner.store.put(sample);

        if !registry.subscribers.is_empty() {
            let event = LiveEvent::SensorData {
                topic: Some(topic.to_string()),
                data: Arc::new(reading.clone()),
            };
            let inner = &self.inner;
            registry
                .subscribers
                .retain(|id, tx| inner.offer(*id, tx, event.clone()));
        }
        reading
    }

    /// Sends one subscriber the current latest reading for `key`.
    ///
    /// Returns `false` if the sensor is unknown or the subscriber is gone.
    pub fn request_one(&self, id: SubscriberId, key: &SensorKey) -> bool {
        let mut registry = self.inner.lock();
        let Some(latest) = self.inner.store.latest(key) else {
            return false;
        };
        let event = LiveEvent::SensorData {
            topic: None,
            data: Arc::new(latest),
        };
        self.deliver_to(&mut registry, id, event)
    }

    /// Sends a single event to one subscriber.
    pub fn notify(&self, id: SubscriberId, event: LiveEvent) -> bool {
        let mut registry = self.inner.lock();
        self.deliver_to(&mut registry, id, event)
    }

    /// Releases a subscriber. Other subscribers and the store are unaffected.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Ends every subscription and refuses new ones.
    pub fn close(&self) {
        let mut registry = self.inner.lock();
        registry.closed = true;
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        tracing::info!(subscribers = count, "closed all live subscriptions");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn deliver_to(&self, registry: &mut Registry, id: SubscriberId, event: LiveEvent) -> bool {
        let Some(tx) = registry.subscribers.get(&id) else {
            return false;
        };
        if self.inner.offer(id, tx, event) {
            true
        } else {
            registry.subscribers.remove(&id);
            false
        }
    }
}

/// One subscriber's end of the hub. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<LiveEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next event; `None` once the hub has let go of this subscriber.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        self.rx.recv().await
    }

    /// Returns an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<LiveEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = LiveEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LiveEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hub_with(settings: HubSettings) -> DistributionHub {
        DistributionHub::new(TelemetryStore::new(), settings)
    }

    fn hub() -> DistributionHub {
        hub_with(HubSettings::default())
    }

    fn sample(device: &str, seq: i64) -> DeviceSample {
        DeviceSample::new("F1", device).with_metric("seq", seq)
    }

    fn initial(subscription: &mut Subscription) -> Vec<SensorReading> {
        match subscription.try_recv() {
            Some(LiveEvent::InitialData { data }) => data,
            other => panic!("expected initial-data first, got {other:?}"),
        }
    }

    fn live(subscription: &mut Subscription) -> (Option<String>, Arc<SensorReading>) {
        match subscription.try_recv() {
            Some(LiveEvent::SensorData { topic, data }) => (topic, data),
            other => panic!("expected sensor-data, got {other:?}"),
        }
    }

    #[test]
    fn subscriber_before_put_gets_one_live_event() {
        let hub = hub();
        let mut sub = hub.subscribe();
        assert!(initial(&mut sub).is_empty());

        let stored = hub.publish("agripal/F1/D1", sample("D1", 1));

        let (topic, data) = live(&mut sub);
        assert_eq!(topic.as_deref(), Some("agripal/F1/D1"));
        assert_eq!(*data, stored);
        assert!(sub.try_recv().is_none(), "exactly one live event expected");
    }

    #[test]
    fn subscriber_after_put_gets_it_in_snapshot_only() {
        let hub = hub();
        let stored = hub.publish("agripal/F1/D1", sample("D1", 1));

        let mut sub = hub.subscribe();
        assert_eq!(initial(&mut sub), vec![stored]);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn live_events_follow_put_order() {
        let hub = hub();
        let mut sub = hub.subscribe();
        initial(&mut sub);

        for seq in 1..=5 {
            hub.publish("t", sample(if seq % 2 == 0 { "A" } else { "B" }, seq));
        }
        let seqs: Vec<serde_json::Value> = (0..5)
            .map(|_| live(&mut sub).1.metric("seq").cloned().unwrap())
            .collect();
        assert_eq!(seqs, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
    }

    #[test]
    fn store_is_updated_before_publish_returns() {
        let hub = hub();
        hub.publish("t", sample("D1", 1));
        assert_eq!(hub.store().count(), 1);
    }

    #[test]
    fn request_one_replies_without_topic() {
        let hub = hub();
        hub.publish("t", sample("D1", 7));
        let mut sub = hub.subscribe();
        initial(&mut sub);

        assert!(hub.request_one(sub.id(), &SensorKey::new("F1", "D1")));
        let (topic, data) = live(&mut sub);
        assert!(topic.is_none());
        assert_eq!(data.metric("seq"), Some(&json!(7)));
    }

    #[test]
    fn request_one_for_unknown_sensor_is_a_no_op() {
        let hub = hub();
        let mut sub = hub.subscribe();
        initial(&mut sub);

        assert!(!hub.request_one(sub.id(), &SensorKey::new("F9", "D9")));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn request_one_only_reaches_the_requester() {
        let hub = hub();
        hub.publish("t", sample("D1", 1));
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        initial(&mut a);
        initial(&mut b);

        hub.request_one(a.id(), &SensorKey::new("F1", "D1"));
        live(&mut a);
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn unsubscribe_leaves_others_untouched() {
        let hub = hub();
        let mut a = hub.subscribe();
        let b = hub.subscribe();
        initial(&mut a);
        assert_eq!(hub.subscriber_count(), 2);

        assert!(hub.unsubscribe(b.id()));
        assert!(!hub.unsubscribe(b.id()), "second unsubscribe is a no-op");
        hub.publish("t", sample("D1", 1));

        live(&mut a);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.store().count(), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = hub();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn slow_consumer_is_disconnected_by_default() {
        let hub = hub_with(HubSettings {
            queue_capacity: 2,
            slow_consumer: SlowConsumerPolicy::Disconnect,
        });
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();
        initial(&mut fast);

        // `slow` still holds initial-data; one more fits, the next overflows.
        for seq in 1..=3 {
            hub.publish("t", sample("D1", seq));
            while fast.try_recv().is_some() {}
        }

        assert_eq!(hub.subscriber_count(), 1);
        initial(&mut slow);
        live(&mut slow);
        assert!(
            slow.rx.try_recv().is_err(),
            "evicted queue should be closed after draining"
        );
    }

    #[test]
    fn slow_consumer_drop_policy_skips_events() {
        let hub = hub_with(HubSettings {
            queue_capacity: 2,
            slow_consumer: SlowConsumerPolicy::Drop,
        });
        let mut slow = hub.subscribe();

        for seq in 1..=3 {
            hub.publish("t", sample("D1", seq));
        }
        assert_eq!(hub.subscriber_count(), 1);

        initial(&mut slow);
        assert_eq!(live(&mut slow).1.metric("seq"), Some(&json!(1)));
        assert!(slow.try_recv().is_none());

        hub.publish("t", sample("D1", 4));
        assert_eq!(live(&mut slow).1.metric("seq"), Some(&json!(4)));
    }

    #[test]
    fn close_ends_subscriptions_and_refuses_new_ones() {
        let hub = hub();
        let mut sub = hub.subscribe();
        hub.close();

        assert!(hub.is_closed());
        assert_eq!(hub.subscriber_count(), 0);
        initial(&mut sub);
        assert!(sub.rx.try_recv().is_err());

        let mut late = hub.subscribe();
        assert!(late.try_recv().is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn notify_reaches_one_subscriber() {
        let hub = hub();
        let mut sub = hub.subscribe();
        initial(&mut sub);

        assert!(hub.notify(
            sub.id(),
            LiveEvent::Error {
                message: "nope".to_string()
            }
        ));
        assert!(matches!(sub.try_recv(), Some(LiveEvent::Error { .. })));
        assert!(!hub.notify(999, LiveEvent::Error { message: String::new() }));
    }
}
