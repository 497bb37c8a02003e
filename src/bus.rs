//! Detection event bus
//!
//! Fan-out of detection records to subscribed consumers. Each subscriber
//! owns a bounded FIFO queue; when a slow subscriber's queue overflows,
//! the oldest queued item is dropped and counted, and the producer is
//! never blocked. Delivery is at-most-once per subscriber and there is no
//! ordering guarantee across subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::core::Detection;

/// Default per-subscriber queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

struct SubscriberQueue {
    queue: Mutex<std::collections::VecDeque<Arc<Detection>>>,
    notify: Notify,
    dropped: AtomicU64,
}

/// One consumer's end of the bus. Dropping the subscription releases its
/// queue.
pub struct Subscription {
    id: Uuid,
    queue: Arc<SubscriberQueue>,
    bus: Arc<BusInner>,
}

impl Subscription {
    /// Receive the next detection, waiting until one is queued. Returns
    /// items strictly in publish order for this subscriber.
    pub async fn recv(&mut self) -> Arc<Detection> {
        loop {
            if let Some(detection) = self.queue.queue.lock().pop_front() {
                return detection;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<Arc<Detection>> {
        self.queue.queue.lock().pop_front()
    }

    /// Items dropped from this subscriber's queue so far
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Detach from the bus, draining anything still queued and releasing
    /// the queue. Dropping the subscription does the same implicitly.
    pub fn unsubscribe(self) {
        self.queue.queue.lock().clear();
        // Removal from the subscriber map happens in Drop
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.write().remove(&self.id);
    }
}

struct BusInner {
    queue_depth: usize,
    subscribers: RwLock<HashMap<Uuid, Arc<SubscriberQueue>>>,
    published: AtomicU64,
    dropped_total: AtomicU64,
}

/// The fan-out hub. Cloneable; all clones publish into the same set of
/// subscriber queues.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                queue_depth: queue_depth.max(1),
                subscribers: RwLock::new(HashMap::new()),
                published: AtomicU64::new(0),
                dropped_total: AtomicU64::new(0),
            }),
        }
    }

    /// Publish a detection to every subscriber. Never blocks: a full
    /// subscriber queue sheds its oldest item.
    pub fn publish(&self, detection: Arc<Detection>) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let subscribers = self.inner.subscribers.read();
        for subscriber in subscribers.values() {
            let mut queue = subscriber.queue.lock();
            if queue.len() >= self.inner.queue_depth {
                queue.pop_front();
                subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                self.inner.dropped_total.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(detection.clone());
            drop(queue);
            subscriber.notify.notify_one();
        }
    }

    /// Register a new subscriber with an empty queue
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let queue = Arc::new(SubscriberQueue {
            queue: Mutex::new(std::collections::VecDeque::with_capacity(
                self.inner.queue_depth,
            )),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        self.inner.subscribers.write().insert(id, queue.clone());
        Subscription {
            id,
            queue,
            bus: self.inner.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Items dropped across all subscriber queues
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped_total.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Mode, ModelScores, Priority, RootCause};
    use crate::features::FeatureVector;
    use chrono::Utc;

    fn detection(id: u64) -> Arc<Detection> {
        Arc::new(Detection {
            id,
            timestamp: Utc::now(),
            mode: Mode::Sim,
            source: "/sim/login".to_string(),
            window_id: id,
            features: FeatureVector::default(),
            rule_alerts: Vec::new(),
            model_scores: ModelScores::default(),
            risk_score: 0.5,
            priority: Priority::Medium,
            is_anomaly: true,
            root_cause: RootCause::TrafficSurge,
            contributing_conditions: Vec::new(),
            root_cause_confidence: 0.89,
            resolutions: Vec::new(),
            detection_latency_ms: 0.3,
            injected_label: None,
            emergency_rank: None,
            is_correctly_detected: None,
        })
    }

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.publish(detection(i));
        }
        for i in 0..5 {
            assert_eq!(sub.recv().await.id, i);
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let bus = EventBus::new(3);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.publish(detection(i));
        }

        // Oldest two were shed; the prefix delivered is contiguous
        assert_eq!(sub.recv().await.id, 2);
        assert_eq!(sub.recv().await.id, 3);
        assert_eq!(sub.recv().await.id, 4);
        assert_eq!(sub.dropped(), 2);
        assert_eq!(bus.dropped_total(), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_fast_one() {
        let bus = EventBus::new(2);
        let mut fast = bus.subscribe();
        let slow = bus.subscribe();

        for i in 0..10 {
            bus.publish(detection(i));
            // Fast subscriber keeps up
            assert_eq!(fast.recv().await.id, i);
        }

        assert_eq!(fast.dropped(), 0);
        assert_eq!(slow.dropped(), 8);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_queue() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(detection(1));
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        // Publishing to nobody is fine
        bus.publish(detection(2));
        assert_eq!(bus.published(), 2);
        assert_eq!(bus.dropped_total(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_on_drop() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);

        // Publishing to nobody is fine
        bus.publish(detection(1));
        assert_eq!(bus.published(), 1);
    }

    #[tokio::test]
    async fn test_publish_never_blocks() {
        let bus = EventBus::new(1);
        let _sub = bus.subscribe();

        // Far beyond the queue depth; publish must return immediately
        for i in 0..10_000 {
            bus.publish(detection(i));
        }
        assert_eq!(bus.dropped_total(), 9_999);
    }
}
