//! In-process topic broker with consumer groups, per-key ordering, and
//! at-least-once delivery.
//!
//! Guarantees:
//! - Messages sharing a `key` on one topic are delivered to a single group
//!   member in publish order; one is in flight per key at a time.
//! - A message counts as consumed only on explicit `ack`. A `nack`, a
//!   dropped `Delivery`, or a visibility timeout triggers redelivery after
//!   a fixed backoff.
//! - After `max_attempts` the message is routed to `<topic>.dlq` and the
//!   failure is logged, never silently dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::error::ChannelError;

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DEAD_LETTER_SUFFIX: &str = ".dlq";

/// Delivery and retry tuning.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Delivery attempts before dead-lettering.
    pub max_attempts: u32,
    /// Unsettled deliveries are treated as failed after this long.
    pub visibility_timeout: Duration,
    /// Fixed delay before redelivery.
    pub redelivery_backoff: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            visibility_timeout: Duration::from_secs(30),
            redelivery_backoff: Duration::from_millis(500),
        }
    }
}

/// One delivered message. Consumed by `ack` or `nack`; dropping it without
/// settling counts as a nack (consumer failure).
#[derive(Debug)]
pub struct Delivery {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    /// 1-based delivery attempt.
    pub attempt: u32,
    settle: Option<oneshot::Sender<bool>>,
}

impl Delivery {
    /// Acknowledge successful consumption.
    pub fn ack(mut self) {
        if let Some(tx) = self.settle.take() {
            let _ = tx.send(true);
        }
    }

    /// Reject; the message will be redelivered or dead-lettered.
    pub fn nack(mut self) {
        if let Some(tx) = self.settle.take() {
            let _ = tx.send(false);
        }
    }
}

/// Receiving side of a consumer-group subscription.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Wait for the next delivery. `None` once the broker is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

struct QueuedMessage {
    payload: serde_json::Value,
    attempt: u32,
}

#[derive(Default)]
struct KeyQueue {
    queue: VecDeque<QueuedMessage>,
    /// True while a delivery for this key is unsettled (or backing off).
    in_flight: bool,
}

#[derive(Default)]
struct Group {
    members: Vec<mpsc::UnboundedSender<Delivery>>,
    next_member: usize,
    keys: HashMap<String, KeyQueue>,
}

#[derive(Default)]
struct Topic {
    groups: HashMap<String, Group>,
    /// Messages published before any group existed, drained to the first
    /// group that subscribes.
    backlog: Vec<(String, serde_json::Value)>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Topic>,
}

/// Topic-addressed publish/subscribe broker.
#[derive(Clone)]
pub struct MessageBroker {
    state: Arc<Mutex<BrokerState>>,
    config: BrokerConfig,
}

impl MessageBroker {
    /// Create a broker.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            config,
        }
    }

    /// Publish a payload to a topic under a routing key.
    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        enqueue_locked(
            &self.state,
            &self.config,
            &mut state,
            topic,
            key,
            payload,
            1,
        );
        Ok(())
    }

    /// Join a consumer group on a topic.
    pub async fn subscribe(&self, topic: &str, group: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        let topic_state = state.topics.entry(topic.to_string()).or_default();

        let is_new_group = !topic_state.groups.contains_key(group);
        let group_state = topic_state.groups.entry(group.to_string()).or_default();
        group_state.members.push(tx);

        if is_new_group {
            for (key, payload) in std::mem::take(&mut topic_state.backlog) {
                group_state
                    .keys
                    .entry(key)
                    .or_default()
                    .queue
                    .push_back(QueuedMessage {
                        payload,
                        attempt: 1,
                    });
            }
        }

        let keys: Vec<String> = state.topics[topic].groups[group].keys.keys().cloned().collect();
        for key in keys {
            dispatch_key(&self.state, &self.config, &mut state, topic, group, &key);
        }

        Subscription { rx }
    }
}

/// Enqueue a message for every group on the topic (with the lock held) and
/// kick dispatch for the affected keys.
fn enqueue_locked(
    state_arc: &Arc<Mutex<BrokerState>>,
    config: &BrokerConfig,
    state: &mut BrokerState,
    topic: &str,
    key: &str,
    payload: serde_json::Value,
    attempt: u32,
) {
    let topic_state = state.topics.entry(topic.to_string()).or_default();

    if topic_state.groups.is_empty() {
        topic_state.backlog.push((key.to_string(), payload));
        return;
    }

    let group_names: Vec<String> = topic_state.groups.keys().cloned().collect();
    for name in &group_names {
        let group = topic_state.groups.get_mut(name).expect("group exists");
        group
            .keys
            .entry(key.to_string())
            .or_default()
            .queue
            .push_back(QueuedMessage {
                payload: payload.clone(),
                attempt,
            });
    }
    for name in &group_names {
        dispatch_key(state_arc, config, state, topic, name, key);
    }
}

/// Deliver the head message for a key if nothing is in flight, and spawn
/// the watchdog that settles it.
fn dispatch_key(
    state_arc: &Arc<Mutex<BrokerState>>,
    config: &BrokerConfig,
    state: &mut BrokerState,
    topic: &str,
    group: &str,
    key: &str,
) {
    let Some(group_state) = state
        .topics
        .get_mut(topic)
        .and_then(|t| t.groups.get_mut(group))
    else {
        return;
    };
    let Some(key_state) = group_state.keys.get_mut(key) else {
        return;
    };
    if key_state.in_flight || key_state.queue.is_empty() {
        return;
    }

    // Drop members whose subscription has been dropped.
    group_state.members.retain(|m| !m.is_closed());
    if group_state.members.is_empty() {
        return;
    }

    let key_state = group_state.keys.get_mut(key).expect("key exists");
    let message = key_state.queue.pop_front().expect("queue non-empty");
    key_state.in_flight = true;

    let (settle_tx, settle_rx) = oneshot::channel();
    let delivery = Delivery {
        topic: topic.to_string(),
        key: key.to_string(),
        payload: message.payload.clone(),
        attempt: message.attempt,
        settle: Some(settle_tx),
    };

    let idx = group_state.next_member % group_state.members.len();
    group_state.next_member = group_state.next_member.wrapping_add(1);
    if group_state.members[idx].send(delivery).is_err() {
        // Member closed between the retain() above and now; requeue and let
        // the next dispatch pick another member.
        let key_state = group_state.keys.get_mut(key).expect("key exists");
        key_state.queue.push_front(message);
        key_state.in_flight = false;
        return;
    }

    let state_arc = Arc::clone(state_arc);
    let config = config.clone();
    let (topic, group, key) = (topic.to_string(), group.to_string(), key.to_string());
    let attempt = message.attempt;
    let payload = message.payload;

    tokio::spawn(async move {
        let acked = matches!(
            tokio::time::timeout(config.visibility_timeout, settle_rx).await,
            Ok(Ok(true))
        );

        if acked {
            let mut state = state_arc.lock().await;
            if let Some(ks) = state
                .topics
                .get_mut(&topic)
                .and_then(|t| t.groups.get_mut(&group))
                .and_then(|g| g.keys.get_mut(&key))
            {
                ks.in_flight = false;
            }
            dispatch_key(&state_arc, &config, &mut state, &topic, &group, &key);
            return;
        }

        if attempt >= config.max_attempts {
            tracing::error!(
                topic = %topic,
                key = %key,
                attempts = attempt,
                "Retry budget exhausted, routing message to dead-letter topic"
            );
            let dlq = format!("{topic}{DEAD_LETTER_SUFFIX}");
            let mut state = state_arc.lock().await;
            enqueue_locked(&state_arc, &config, &mut state, &dlq, &key, payload, 1);
            if let Some(ks) = state
                .topics
                .get_mut(&topic)
                .and_then(|t| t.groups.get_mut(&group))
                .and_then(|g| g.keys.get_mut(&key))
            {
                ks.in_flight = false;
            }
            dispatch_key(&state_arc, &config, &mut state, &topic, &group, &key);
        } else {
            tracing::warn!(
                topic = %topic,
                key = %key,
                attempt,
                "Delivery not acknowledged, scheduling redelivery"
            );
            // in_flight stays set through the backoff so later messages on
            // this key cannot overtake the redelivery.
            tokio::time::sleep(config.redelivery_backoff).await;
            let mut state = state_arc.lock().await;
            if let Some(ks) = state
                .topics
                .get_mut(&topic)
                .and_then(|t| t.groups.get_mut(&group))
                .and_then(|g| g.keys.get_mut(&key))
            {
                ks.queue.push_front(QueuedMessage {
                    payload,
                    attempt: attempt + 1,
                });
                ks.in_flight = false;
            }
            dispatch_key(&state_arc, &config, &mut state, &topic, &group, &key);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BrokerConfig {
        BrokerConfig {
            max_attempts: 3,
            visibility_timeout: Duration::from_millis(200),
            redelivery_backoff: Duration::from_millis(10),
        }
    }

    fn payload(n: u32) -> serde_json::Value {
        serde_json::json!({ "n": n })
    }

    #[tokio::test]
    async fn publish_then_subscribe_drains_backlog() {
        let broker = MessageBroker::new(fast_config());
        broker.publish("t", "k", payload(1)).await.unwrap();

        let mut sub = broker.subscribe("t", "g").await;
        let delivery = sub.recv().await.unwrap();
        assert_eq!(delivery.payload, payload(1));
        assert_eq!(delivery.attempt, 1);
        delivery.ack();
    }

    #[tokio::test]
    async fn acked_message_is_not_redelivered() {
        let broker = MessageBroker::new(fast_config());
        let mut sub = broker.subscribe("t", "g").await;
        broker.publish("t", "k", payload(1)).await.unwrap();

        sub.recv().await.unwrap().ack();

        let extra = tokio::time::timeout(Duration::from_millis(400), sub.recv()).await;
        assert!(extra.is_err(), "acked message must not come back");
    }

    #[tokio::test]
    async fn nack_triggers_redelivery_with_higher_attempt() {
        let broker = MessageBroker::new(fast_config());
        let mut sub = broker.subscribe("t", "g").await;
        broker.publish("t", "k", payload(1)).await.unwrap();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.attempt, 1);
        first.nack();

        let second = sub.recv().await.unwrap();
        assert_eq!(second.attempt, 2);
        second.ack();
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered() {
        let broker = MessageBroker::new(fast_config());
        let mut sub = broker.subscribe("t", "g").await;
        broker.publish("t", "k", payload(1)).await.unwrap();

        // Simulate a consumer crash: receive and drop without settling.
        drop(sub.recv().await.unwrap());

        let redelivered = sub.recv().await.unwrap();
        assert_eq!(redelivered.attempt, 2);
        redelivered.ack();
    }

    #[tokio::test]
    async fn exhausted_retries_route_to_dead_letter() {
        let broker = MessageBroker::new(fast_config());
        let mut dlq = broker.subscribe("t.dlq", "dlq-watch").await;
        let mut sub = broker.subscribe("t", "g").await;
        broker.publish("t", "k", payload(7)).await.unwrap();

        for attempt in 1..=3 {
            let delivery = sub.recv().await.unwrap();
            assert_eq!(delivery.attempt, attempt);
            delivery.nack();
        }

        let dead = tokio::time::timeout(Duration::from_secs(1), dlq.recv())
            .await
            .expect("dead-letter delivery")
            .unwrap();
        assert_eq!(dead.payload, payload(7));
        dead.ack();

        let extra = tokio::time::timeout(Duration::from_millis(300), sub.recv()).await;
        assert!(extra.is_err(), "dead-lettered message must leave the topic");
    }

    #[tokio::test]
    async fn same_key_is_serialized_in_publish_order() {
        let broker = MessageBroker::new(fast_config());
        let mut sub = broker.subscribe("t", "g").await;
        broker.publish("t", "k", payload(1)).await.unwrap();
        broker.publish("t", "k", payload(2)).await.unwrap();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.payload, payload(1));

        // Second must not arrive while the first is unsettled.
        let early = tokio::time::timeout(Duration::from_millis(100), sub.recv()).await;
        assert!(early.is_err(), "same-key message overtook an in-flight one");

        first.ack();
        let second = sub.recv().await.unwrap();
        assert_eq!(second.payload, payload(2));
        second.ack();
    }

    #[tokio::test]
    async fn different_keys_are_delivered_concurrently() {
        let broker = MessageBroker::new(fast_config());
        let mut sub = broker.subscribe("t", "g").await;
        broker.publish("t", "a", payload(1)).await.unwrap();
        broker.publish("t", "b", payload(2)).await.unwrap();

        // Both arrive without either being acked.
        let first = sub.recv().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(300), sub.recv())
            .await
            .expect("second key should not wait on the first")
            .unwrap();
        assert_ne!(first.key, second.key);
        first.ack();
        second.ack();
    }

    #[tokio::test]
    async fn group_members_share_the_work() {
        let broker = MessageBroker::new(fast_config());
        let mut a = broker.subscribe("t", "g").await;
        let mut b = broker.subscribe("t", "g").await;

        broker.publish("t", "k1", payload(1)).await.unwrap();
        broker.publish("t", "k2", payload(2)).await.unwrap();

        // One delivery lands on each member (round-robin over keys).
        let da = tokio::time::timeout(Duration::from_millis(500), a.recv())
            .await
            .expect("member a delivery")
            .unwrap();
        let db = tokio::time::timeout(Duration::from_millis(500), b.recv())
            .await
            .expect("member b delivery")
            .unwrap();
        assert_ne!(da.key, db.key);
        da.ack();
        db.ack();
    }
}
