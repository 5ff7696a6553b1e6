//! Per-subscriber bounded queues with drop-oldest overflow.
//!
//! The acquisition task is the only producer. Each subscriber owns the
//! receiving end of its own queue, so a stalled consumer only ever loses its
//! own oldest events.

use crate::analysis::{AlertEvent, PeakTrack};
use crate::core::SpectrumFrame;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Track table after one frame
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub tracks: Vec<PeakTrack>,
}

/// Read-only output of one pipeline cycle
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Frame(Arc<SpectrumFrame>),
    Tracks(Arc<TrackSnapshot>),
    Alert(Arc<AlertEvent>),
}

impl PipelineEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Frame(frame) => frame.sequence,
            Self::Tracks(snapshot) => snapshot.sequence,
            Self::Alert(alert) => alert.sequence,
        }
    }
}

/// Which event kinds a subscriber wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    pub frames: bool,
    pub tracks: bool,
    pub alerts: bool,
}

impl EventFilter {
    pub fn all() -> Self {
        Self {
            frames: true,
            tracks: true,
            alerts: true,
        }
    }

    pub fn frames_only() -> Self {
        Self {
            frames: true,
            tracks: false,
            alerts: false,
        }
    }

    pub fn alerts_only() -> Self {
        Self {
            frames: false,
            tracks: false,
            alerts: true,
        }
    }

    pub fn accepts(&self, event: &PipelineEvent) -> bool {
        match event {
            PipelineEvent::Frame(_) => self.frames,
            PipelineEvent::Tracks(_) => self.tracks,
            PipelineEvent::Alert(_) => self.alerts,
        }
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Delivery counts for one subscriber, shared by both ends of its queue
#[derive(Debug, Default)]
pub struct SubscriberStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    received: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberStats {
    /// Events accepted into the queue
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Events evicted unread because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events taken off the queue by the consumer
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Consumer end of a subscription. Dropping it unsubscribes.
pub struct Subscription {
    name: String,
    rx: Receiver<PipelineEvent>,
    stats: Arc<SubscriberStats>,
    ready: Arc<Notify>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn try_recv(&self) -> Option<PipelineEvent> {
        match self.rx.try_recv() {
            Ok(event) => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                Some(event)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block the calling thread for at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Await the next event without blocking the runtime.
    ///
    /// Events are only taken off the queue inside this call, so dropping the
    /// future before it resolves leaves every queued event in place.
    pub async fn next(&self, timeout: Duration) -> Option<PipelineEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Registered before the check so a delivery in between still wakes us
            let notified = self.ready.notified();
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_recv();
            }
        }
    }

    /// Everything queued right now, oldest first
    pub fn drain(&self) -> Vec<PipelineEvent> {
        let mut events = Vec::with_capacity(self.rx.len());
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn stats(&self) -> &SubscriberStats {
        &self.stats
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stats.closed.store(true, Ordering::Relaxed);
    }
}

/// Producer end of a subscription, owned by the fanout
pub struct Subscriber {
    name: String,
    filter: EventFilter,
    tx: Sender<PipelineEvent>,
    // Producer-side handle used to evict the oldest event when full
    overflow_rx: Receiver<PipelineEvent>,
    stats: Arc<SubscriberStats>,
    ready: Arc<Notify>,
}

impl Subscriber {
    fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::Relaxed)
    }

    fn deliver(&self, mut event: PipelineEvent) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    self.ready.notify_one();
                    return;
                }
                Err(TrySendError::Full(rejected)) => {
                    if self.overflow_rx.try_recv().is_ok() {
                        let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped == 1 || dropped % 100 == 0 {
                            log::warn!(
                                "Subscriber '{}' is behind, {} events dropped so far",
                                self.name,
                                dropped
                            );
                        }
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Create both ends of a subscription
pub fn subscription(
    name: impl Into<String>,
    capacity: usize,
    filter: EventFilter,
) -> (Subscriber, Subscription) {
    let name = name.into();
    let (tx, rx) = bounded(capacity.max(1));
    let stats = Arc::new(SubscriberStats::default());
    let ready = Arc::new(Notify::new());

    let subscriber = Subscriber {
        name: name.clone(),
        filter,
        tx,
        overflow_rx: rx.clone(),
        stats: stats.clone(),
        ready: ready.clone(),
    };
    let subscription = Subscription {
        name,
        rx,
        stats,
        ready,
    };
    (subscriber, subscription)
}

/// Hands new subscribers to the fanout without sharing its subscriber list
#[derive(Clone)]
pub struct SubscriptionRegistry {
    tx: Sender<Subscriber>,
    default_capacity: usize,
}

impl SubscriptionRegistry {
    pub fn subscribe(&self, name: impl Into<String>, filter: EventFilter) -> Subscription {
        self.subscribe_with_capacity(name, self.default_capacity, filter)
    }

    pub fn subscribe_with_capacity(
        &self,
        name: impl Into<String>,
        capacity: usize,
        filter: EventFilter,
    ) -> Subscription {
        let (subscriber, subscription) = subscription(name, capacity, filter);
        if self.tx.send(subscriber).is_err() {
            log::warn!("Fanout is gone, subscription '{}' will stay empty", subscription.name());
        }
        subscription
    }
}

/// Publishes events to every live subscriber in production order
pub struct Fanout {
    subscribers: Vec<Subscriber>,
    registrations: Receiver<Subscriber>,
}

impl Fanout {
    pub fn new(default_capacity: usize) -> (Self, SubscriptionRegistry) {
        let (tx, registrations) = crossbeam_channel::unbounded();
        let fanout = Self {
            subscribers: Vec::new(),
            registrations,
        };
        let registry = SubscriptionRegistry {
            tx,
            default_capacity,
        };
        (fanout, registry)
    }

    /// Pick up subscriptions made since the last call
    pub fn accept_pending(&mut self) {
        while let Ok(subscriber) = self.registrations.try_recv() {
            log::debug!("Subscriber '{}' attached", subscriber.name);
            self.subscribers.push(subscriber);
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        self.subscribers.retain(|subscriber| {
            if subscriber.is_closed() {
                log::debug!("Subscriber '{}' detached", subscriber.name);
                return false;
            }
            true
        });

        for subscriber in &self.subscribers {
            if subscriber.filter.accepts(&event) {
                subscriber.deliver(event.clone());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Severity;

    fn alert(sequence: u64) -> PipelineEvent {
        PipelineEvent::Alert(Arc::new(AlertEvent {
            rule_id: "r".to_string(),
            severity: Severity::Warning,
            frequency_hz: 1.0,
            power_dbm: -10.0,
            timestamp_us: sequence,
            sequence,
            track_id: None,
            message: String::new(),
        }))
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let (mut fanout, registry) = Fanout::new(4);
        let sub = registry.subscribe_with_capacity("slow", 3, EventFilter::all());
        fanout.accept_pending();

        for sequence in 0..10 {
            fanout.publish(alert(sequence));
        }

        let sequences: Vec<u64> = sub.drain().iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, vec![7, 8, 9]);
        assert_eq!(sub.stats().delivered(), 10);
        assert_eq!(sub.stats().dropped(), 7);
        assert_eq!(sub.stats().received(), 3);
    }

    #[test]
    fn test_filter_and_unsubscribe() {
        let (mut fanout, registry) = Fanout::new(4);
        let frames = registry.subscribe("frames", EventFilter::frames_only());
        let alerts = registry.subscribe("alerts", EventFilter::alerts_only());
        fanout.accept_pending();
        assert_eq!(fanout.subscriber_count(), 2);

        fanout.publish(alert(1));
        assert!(frames.try_recv().is_none());
        assert_eq!(alerts.try_recv().map(|e| e.sequence()), Some(1));

        drop(frames);
        fanout.publish(alert(2));
        assert_eq!(fanout.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_next_leaves_queue_intact() {
        let (mut fanout, registry) = Fanout::new(4);
        let sub = registry.subscribe("display", EventFilter::all());
        fanout.accept_pending();

        let waited =
            tokio::time::timeout(Duration::from_millis(20), sub.next(Duration::from_millis(500))).await;
        assert!(waited.is_err());

        fanout.publish(alert(1));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sub.try_recv().map(|e| e.sequence()), Some(1));
        assert_eq!(sub.stats().delivered(), 1);
        assert_eq!(sub.stats().dropped(), 0);
        assert_eq!(sub.stats().received(), 1);
    }

    #[tokio::test]
    async fn test_next_wakes_on_delivery() {
        let (mut fanout, registry) = Fanout::new(4);
        let sub = registry.subscribe("display", EventFilter::all());
        fanout.accept_pending();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            fanout.publish(alert(5));
        });

        let event = sub.next(Duration::from_secs(2)).await;
        assert_eq!(event.map(|e| e.sequence()), Some(5));
        assert!(sub.next(Duration::from_millis(10)).await.is_none());
        producer.await.unwrap();
    }
}
