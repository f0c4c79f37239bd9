//! In-process partitioned event bus
//!
//! Delivery semantics mirror a keyed, partitioned broker:
//!
//! - at-least-once: a handler that fails is redelivered the same event with a
//!   fixed backoff (default 3 attempts, 3000 ms) before the bus gives up
//! - ordered per key: a key always hashes to the same partition, and each
//!   partition is drained by a single worker task, so events for one resource
//!   are handled strictly in publish order while different resources proceed
//!   concurrently
//! - dead-lettering: once redelivery is exhausted the event is forwarded
//!   verbatim to `<topic>.dlt` and the failure is logged, never re-raised to
//!   the producer
//!
//! Each `subscribe` call registers one consumer group: every group receives
//! its own copy of each published event.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{dead_letter_topic, EventEnvelope, ResourceEvent};
use crate::trace::TraceContext;

/// Default partition count per consumer group.
pub const DEFAULT_PARTITIONS: usize = 4;

/// Default redelivery attempts before dead-lettering.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default fixed delay between redeliveries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Handler invoked for every event delivered to a subscription.
///
/// Handlers must be idempotent: redelivery of an event for a resource already
/// in its target state has to be a safe no-op.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: ResourceEvent, trace: TraceContext) -> Result<()>;
}

/// Bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub partitions: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

struct Subscription {
    group_id: String,
    // One sender per partition; index = hash(key) % partitions.
    partitions: Vec<mpsc::UnboundedSender<EventEnvelope>>,
}

struct Inner {
    config: BusConfig,
    topics: Mutex<HashMap<String, Vec<Subscription>>>,
}

/// Cheap-to-clone handle to the bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Publish an event to a topic, keyed for per-resource ordering.
    pub fn publish(&self, topic: &str, key: &str, event: ResourceEvent, trace: TraceContext) {
        self.inner.publish(topic, key, event, trace);
    }

    /// Register a consumer group on a topic. Spawns one worker task per
    /// partition; workers run until the bus is dropped.
    pub fn subscribe(&self, topic: &str, group_id: &str, handler: Arc<dyn EventHandler>) {
        let partitions = self.inner.config.partitions.max(1);
        let mut senders = Vec::with_capacity(partitions);
        for partition in 0..partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            tokio::spawn(partition_worker(
                Arc::downgrade(&self.inner),
                topic.to_string(),
                group_id.to_string(),
                partition,
                rx,
                Arc::clone(&handler),
            ));
        }

        let mut topics = lock(&self.inner.topics);
        topics.entry(topic.to_string()).or_default().push(Subscription {
            group_id: group_id.to_string(),
            partitions: senders,
        });
        info!(topic, group_id, partitions, "consumer group subscribed");
    }
}

impl Inner {
    fn publish(&self, topic: &str, key: &str, event: ResourceEvent, trace: TraceContext) {
        let topics = lock(&self.topics);
        let Some(subscriptions) = topics.get(topic) else {
            debug!(topic, key, "no subscribers for topic, event dropped");
            return;
        };
        for subscription in subscriptions {
            let partition = partition_for(key, subscription.partitions.len());
            let envelope = EventEnvelope {
                topic: topic.to_string(),
                event: event.clone(),
                trace: trace.clone(),
            };
            if subscription.partitions[partition].send(envelope).is_err() {
                warn!(
                    topic,
                    group_id = %subscription.group_id,
                    partition,
                    "subscriber worker gone, event dropped"
                );
            }
        }
    }
}

fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % partitions.max(1)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Drains one partition in order, retrying failed deliveries with a fixed
/// backoff and dead-lettering after exhaustion.
async fn partition_worker(
    bus: Weak<Inner>,
    topic: String,
    group_id: String,
    partition: usize,
    mut rx: mpsc::UnboundedReceiver<EventEnvelope>,
    handler: Arc<dyn EventHandler>,
) {
    while let Some(envelope) = rx.recv().await {
        let (attempts, delay) = match bus.upgrade() {
            Some(inner) => (inner.config.retry_attempts.max(1), inner.config.retry_delay),
            None => break,
        };

        let mut delivered = false;
        for attempt in 1..=attempts {
            match handler
                .handle(envelope.event.clone(), envelope.trace.clone())
                .await
            {
                Ok(()) => {
                    delivered = true;
                    break;
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        topic = %topic,
                        group_id = %group_id,
                        partition,
                        resource_id = %envelope.event.resource_id(),
                        attempt,
                        error = %err,
                        "handler failed, redelivering"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        topic = %topic,
                        group_id = %group_id,
                        partition,
                        resource_id = %envelope.event.resource_id(),
                        error = %err,
                        "redelivery exhausted, sending to dead-letter topic"
                    );
                }
            }
        }

        if !delivered {
            if let Some(inner) = bus.upgrade() {
                inner.publish(
                    &dead_letter_topic(&topic),
                    envelope.event.resource_id(),
                    envelope.event.clone(),
                    envelope.trace.clone(),
                );
            }
        }
    }
    debug!(topic = %topic, group_id = %group_id, partition, "partition worker stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::FlowError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct Recorder {
        seen: AsyncMutex<Vec<String>>,
        notify: tokio::sync::Notify,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: AsyncMutex::new(Vec::new()),
                notify: tokio::sync::Notify::new(),
            })
        }

        async fn wait_for(&self, count: usize) {
            loop {
                if self.seen.lock().await.len() >= count {
                    return;
                }
                self.notify.notified().await;
            }
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: ResourceEvent, _trace: TraceContext) -> Result<()> {
            self.seen
                .lock()
                .await
                .push(format!("{}:{}", event.resource_id(), event.event_type()));
            self.notify.notify_waiters();
            Ok(())
        }
    }

    struct AlwaysFails {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for AlwaysFails {
        async fn handle(&self, _event: ResourceEvent, _trace: TraceContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FlowError::Transient("downstream unavailable".into()))
        }
    }

    fn fast_config() -> BusConfig {
        BusConfig {
            partitions: 4,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn events_for_one_key_stay_ordered() {
        let bus = EventBus::new(fast_config());
        let recorder = Recorder::new();
        bus.subscribe("orders", "group-a", recorder.clone());

        for i in 0..10 {
            let kind = if i % 2 == 0 {
                EventType::Create
            } else {
                EventType::Delete
            };
            let event = ResourceEvent::new("55", kind).unwrap();
            bus.publish("orders", "55", event, TraceContext::new());
        }

        recorder.wait_for(10).await;
        let seen = recorder.seen.lock().await;
        for (i, entry) in seen.iter().enumerate() {
            let expected = if i % 2 == 0 { "55:CREATE" } else { "55:DELETE" };
            assert_eq!(entry, expected);
        }
    }

    #[tokio::test]
    async fn each_group_gets_its_own_copy() {
        let bus = EventBus::new(fast_config());
        let a = Recorder::new();
        let b = Recorder::new();
        bus.subscribe("t", "group-a", a.clone());
        bus.subscribe("t", "group-b", b.clone());

        let event = ResourceEvent::new("1", EventType::Create).unwrap();
        bus.publish("t", "1", event, TraceContext::new());

        a.wait_for(1).await;
        b.wait_for(1).await;
    }

    #[tokio::test]
    async fn exhausted_retries_route_to_dead_letter_topic() {
        let bus = EventBus::new(fast_config());
        let failing = Arc::new(AlwaysFails {
            calls: AtomicU32::new(0),
        });
        let dlt = Recorder::new();
        bus.subscribe("t", "group-a", failing.clone());
        bus.subscribe(&dead_letter_topic("t"), "dlt-watch", dlt.clone());

        let event = ResourceEvent::new("9", EventType::Create).unwrap();
        bus.publish("t", "9", event, TraceContext::new());

        dlt.wait_for(1).await;
        assert_eq!(failing.calls.load(Ordering::SeqCst), 3);
        let seen = dlt.seen.lock().await;
        // Verbatim copy of the original event.
        assert_eq!(seen[0], "9:CREATE");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new(fast_config());
        let event = ResourceEvent::new("3", EventType::Delete).unwrap();
        bus.publish("nobody-home", "3", event, TraceContext::new());
    }
}
