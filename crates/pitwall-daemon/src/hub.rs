//! In-process telemetry broadcaster.
//!
//! One producer publishes frames; each subscriber owns a bounded queue
//! drained by its own writer task. Publishing never blocks: when a
//! subscriber's queue is full the oldest frame is discarded and the new
//! one accepted: the dashboard wants recent data, not history.
//! The hub holds no lock across I/O; publish takes a snapshot of the
//! subscriber set and touches each queue under its own short lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pitwall_core::telemetry::Frame;
use tokio::sync::Notify;

/// Frames buffered per subscriber before drop-oldest kicks in.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    queue: Mutex<std::collections::VecDeque<Arc<Frame>>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Broadcast hub from the active telemetry source to all WebSocket
/// subscribers.
#[derive(Debug, Default)]
pub struct TelemetryHub {
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
    next_id: AtomicU64,
}

impl TelemetryHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Dropping the returned handle unsubscribes.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscriber {
            id,
            queue: Mutex::new(std::collections::VecDeque::with_capacity(
                SUBSCRIBER_QUEUE_CAPACITY,
            )),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        self.lock_subscribers().insert(id, Arc::clone(&sub));
        Subscription {
            hub: Arc::clone(self),
            sub,
        }
    }

    /// Publishes one frame to every live subscriber.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let snapshot: Vec<Arc<Subscriber>> =
            self.lock_subscribers().values().cloned().collect();
        for sub in snapshot {
            let mut queue = sub.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if queue.len() >= SUBSCRIBER_QUEUE_CAPACITY {
                queue.pop_front();
                sub.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(Arc::clone(&frame));
            drop(queue);
            sub.notify.notify_one();
        }
    }

    /// Removes a subscriber. Safe to call repeatedly.
    pub fn unsubscribe(&self, id: u64) {
        if let Some(sub) = self.lock_subscribers().remove(&id) {
            sub.closed.store(true, Ordering::Release);
            sub.notify.notify_one();
        }
    }

    /// Closes every subscriber; their `recv` calls return `None` once
    /// their queues drain.
    pub fn close_all(&self) {
        let drained: Vec<Arc<Subscriber>> =
            self.lock_subscribers().drain().map(|(_, s)| s).collect();
        for sub in drained {
            sub.closed.store(true, Ordering::Release);
            sub.notify.notify_one();
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A subscriber handle. Frames arrive in publish order; `recv` returns
/// `None` after the hub closes this subscriber and its queue is drained.
#[derive(Debug)]
pub struct Subscription {
    hub: Arc<TelemetryHub>,
    sub: Arc<Subscriber>,
}

impl Subscription {
    /// Waits for the next frame.
    pub async fn recv(&self) -> Option<Arc<Frame>> {
        loop {
            {
                let mut queue = self
                    .sub
                    .queue
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
            }
            if self.sub.closed.load(Ordering::Acquire) {
                return None;
            }
            self.sub.notify.notified().await;
        }
    }

    /// Frames discarded from this subscriber's queue so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.sub.dropped.load(Ordering::Relaxed)
    }

    /// This subscriber's id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.sub.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.sub.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_core::telemetry::SourceKind;

    fn frame(n: u64) -> Frame {
        let mut channels = std::collections::BTreeMap::new();
        channels.insert("seq".to_string(), n as f64);
        Frame {
            timestamp: n as f64,
            source: SourceKind::Simulated,
            channels,
        }
    }

    #[tokio::test]
    async fn test_frames_arrive_in_publish_order() {
        let hub = Arc::new(TelemetryHub::new());
        let sub = hub.subscribe();
        for n in 0..10 {
            hub.publish(frame(n));
        }
        for n in 0..10 {
            let got = sub.recv().await.unwrap();
            assert_eq!(got.channels["seq"], n as f64);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let hub = Arc::new(TelemetryHub::new());
        let sub = hub.subscribe();
        let total = SUBSCRIBER_QUEUE_CAPACITY as u64 + 10;
        for n in 0..total {
            hub.publish(frame(n));
        }
        assert_eq!(sub.dropped(), 10);
        // The survivors are the most recent frames, still in order.
        let first = sub.recv().await.unwrap();
        assert_eq!(first.channels["seq"], 10.0);
        let mut prev = 10.0;
        for _ in 1..SUBSCRIBER_QUEUE_CAPACITY {
            let got = sub.recv().await.unwrap();
            assert!(got.channels["seq"] > prev);
            prev = got.channels["seq"];
        }
    }

    #[tokio::test]
    async fn test_subscribers_are_independent() {
        let hub = Arc::new(TelemetryHub::new());
        let a = hub.subscribe();
        let b = hub.subscribe();
        hub.publish(frame(1));
        assert_eq!(a.recv().await.unwrap().timestamp, 1.0);
        assert_eq!(b.recv().await.unwrap().timestamp, 1.0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = Arc::new(TelemetryHub::new());
        let sub = hub.subscribe();
        let id = sub.id();
        hub.unsubscribe(id);
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let hub = Arc::new(TelemetryHub::new());
        {
            let _sub = hub.subscribe();
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_recv_after_drain() {
        let hub = Arc::new(TelemetryHub::new());
        let sub = hub.subscribe();
        hub.publish(frame(1));
        hub.close_all();
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
