pub mod channel;
pub mod message;
pub mod queue;
pub mod retry;

pub use channel::{AccessControl, Channel, ChannelType, Filter, FilterAction, FilterOperator};
pub use message::{Message, MessagePriority, Reliability, SendOptions};
pub use queue::{DeadLetterEntry, DeliveryMode, Queue, QueueType};
pub use retry::{RetryConfig, RetryScheduler};

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub topic_pattern: String,
    pub subscriber: String,
    pub qos: u8,
    pub ack_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub max_message_size: usize,
    pub default_delivery_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1_048_576,
            default_delivery_timeout_ms: 30_000,
            ack_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub delivered: Vec<String>,
    pub queued_for_retry: Vec<String>,
    pub dead_lettered: Vec<String>,
}

/// Channels (broadcast/multicast/topic/queue), per-channel message
/// queues, topic subscriptions, and delivery reliability. Owned
/// exclusively by the bus worker; transport failures are reported
/// through [`crate::transport::AgentTransport`] implementations rather
/// than by reaching into other subsystems' state.
pub struct MessageBus {
    config: BusConfig,
    channels: RwLock<HashMap<String, Channel>>,
    queues: RwLock<HashMap<String, Queue>>,
    subscriptions: RwLock<Vec<Subscription>>,
    retry_scheduler: RwLock<RetryScheduler>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        let retry = RetryScheduler::new(config.retry.clone());
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
            retry_scheduler: RwLock::new(retry),
        }
    }

    pub async fn create_channel(&self, channel: Channel) {
        self.channels.write().await.insert(channel.name.clone(), channel);
    }

    pub async fn create_queue(&self, queue: Queue) {
        self.queues.write().await.insert(queue.name.clone(), queue);
    }

    pub async fn subscribe(&self, subscription: Subscription) {
        self.subscriptions.write().await.push(subscription);
    }

    fn topic_matches(pattern: &str, msg_type: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            return msg_type.starts_with(prefix);
        }
        pattern == msg_type
    }

    async fn resolve_receivers(&self, channel_name: Option<&str>, msg_type: &str, explicit: &[String]) -> Vec<String> {
        if !explicit.is_empty() {
            return explicit.to_vec();
        }

        if let Some(name) = channel_name {
            if let Some(channel) = self.channels.read().await.get(name) {
                return channel.participants.iter().cloned().collect();
            }
        }

        let subs = self.subscriptions.read().await;
        let matched: Vec<String> = subs
            .iter()
            .filter(|s| Self::topic_matches(&s.topic_pattern, msg_type))
            .map(|s| s.subscriber.clone())
            .collect();
        matched
    }

    /// Sends `message` to its resolved receivers, honoring its
    /// reliability tier. Returns per-receiver delivery results; the
    /// caller's transport is invoked via `deliver`.
    pub async fn send<F, Fut>(
        &self,
        mut message: Message,
        channel_name: Option<&str>,
        deliver: F,
    ) -> Result<DeliveryOutcome>
    where
        F: Fn(Message, String) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), String>>,
    {
        if message.receivers.is_empty() {
            let resolved = self
                .resolve_receivers(channel_name, &message.msg_type, &message.receivers)
                .await;
            message.receivers = resolved;
        }

        if let Some(name) = channel_name {
            let mut channels = self.channels.write().await;
            if let Some(channel) = channels.get_mut(name) {
                message = match channel.apply_filters(message) {
                    Some(m) => channel.apply_middleware(m),
                    None => return Ok(DeliveryOutcome::default()),
                };
            }
        }

        if message.receivers.is_empty() {
            return Err(OrchestratorError::invalid("message has no resolvable receivers"));
        }
        if message.size() > self.config.max_message_size {
            return Err(OrchestratorError::invalid("message exceeds max size"));
        }
        if message.is_expired() {
            return Err(OrchestratorError::invalid("message already expired"));
        }

        let mut outcome = DeliveryOutcome::default();

        for receiver in message.receivers.clone() {
            let mut attempt = message.clone();
            attempt.record_hop(receiver.clone());

            match deliver(attempt.clone(), receiver.clone()).await {
                Ok(()) => {
                    outcome.delivered.push(receiver);
                }
                Err(e) => match message.reliability {
                    Reliability::BestEffort => {
                        warn!(receiver = %receiver, error = %e, "best-effort delivery failed, dropping");
                    }
                    Reliability::AtLeastOnce => {
                        self.retry_scheduler.write().await.schedule(
                            attempt,
                            receiver.clone(),
                            self.config.retry.base_backoff,
                        );
                        outcome.queued_for_retry.push(receiver);
                    }
                    Reliability::ExactlyOnce => {
                        return Err(OrchestratorError::DeliveryFailure(format!(
                            "exactly-once delivery to {receiver} failed: {e}"
                        )));
                    }
                },
            }
        }

        Ok(outcome)
    }

    pub async fn enqueue(&self, queue_name: &str, message: Message) -> Result<()> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| OrchestratorError::not_found(format!("queue {queue_name}")))?;
        if !queue.push(message) {
            return Err(OrchestratorError::capacity(format!("queue {queue_name} is full")));
        }
        Ok(())
    }

    pub async fn dequeue(&self, queue_name: &str) -> Result<Option<Message>> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| OrchestratorError::not_found(format!("queue {queue_name}")))?;
        Ok(queue.pop_ready())
    }

    pub async fn ack(&self, queue_name: &str, message_id: &str, subscriber: &str) -> Result<bool> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| OrchestratorError::not_found(format!("queue {queue_name}")))?;
        self.retry_scheduler.write().await.resolve(message_id, subscriber);
        Ok(queue.ack(message_id, subscriber))
    }

    /// One retry-manager tick: reissues deliveries whose backoff has
    /// elapsed via `deliver`, and moves exhausted deliveries to the
    /// named queue's dead-letter store with reason `retry_exhausted`.
    pub async fn run_retry_tick<F, Fut>(&self, dead_letter_queue: &str, deliver: F)
    where
        F: Fn(Message, String) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), String>>,
    {
        let due = self.retry_scheduler.read().await.due(self.config.retry.max_attempts);
        for (message, receiver) in due {
            match deliver(message.clone(), receiver.clone()).await {
                Ok(()) => {
                    self.retry_scheduler.write().await.resolve(&message.id, &receiver);
                    debug!(receiver = %receiver, "retried delivery succeeded");
                }
                Err(_) => {
                    self.retry_scheduler.write().await.schedule(
                        message,
                        receiver,
                        self.config.retry.base_backoff,
                    );
                }
            }
        }

        let exhausted = self
            .retry_scheduler
            .write()
            .await
            .drain_exhausted(self.config.retry.max_attempts);
        if exhausted.is_empty() {
            return;
        }

        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(dead_letter_queue) {
            for (message, _) in exhausted {
                queue.dead_letter(message, "retry_exhausted");
            }
        }
    }

    pub async fn channel(&self, name: &str) -> Option<Channel> {
        self.channels.read().await.get(name).cloned()
    }

    pub async fn queue_depth(&self, name: &str) -> Option<usize> {
        self.queues.read().await.get(name).map(|q| q.len())
    }

    pub async fn dead_letter_count(&self, name: &str) -> Option<usize> {
        self.queues.read().await.get(name).map(|q| q.dead_letters().len())
    }

    /// Per-queue depth, keyed by queue name, for monitoring snapshots.
    pub async fn queue_depths(&self) -> Vec<(String, usize)> {
        self.queues
            .read()
            .await
            .iter()
            .map(|(name, q)| (name.clone(), q.len()))
            .collect()
    }

    /// Per-queue dead-letter count, keyed by queue name, for monitoring snapshots.
    pub async fn dead_letter_counts(&self) -> Vec<(String, usize)> {
        self.queues
            .read()
            .await
            .iter()
            .map(|(name, q)| (name.clone(), q.dead_letters().len()))
            .collect()
    }

    pub async fn subscribers_for(&self, msg_type: &str) -> HashSet<String> {
        self.subscriptions
            .read()
            .await
            .iter()
            .filter(|s| Self::topic_matches(&s.topic_pattern, msg_type))
            .map(|s| s.subscriber.clone())
            .collect()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn best_effort_drops_silently_on_failure() {
        let bus = MessageBus::default();
        let message = Message::new(
            "ping",
            "a1",
            vec!["a2".to_string()],
            vec![],
            "text/plain",
            SendOptions::default(),
        );

        let outcome = bus
            .send(message, None, |_, _| async { Err::<(), _>("down".to_string()) })
            .await
            .unwrap();
        assert!(outcome.delivered.is_empty());
        assert!(outcome.queued_for_retry.is_empty());
    }

    #[tokio::test]
    async fn at_least_once_schedules_retry_on_failure() {
        let bus = MessageBus::default();
        let message = Message::new(
            "ping",
            "a1",
            vec!["a2".to_string()],
            vec![],
            "text/plain",
            SendOptions {
                reliability: Reliability::AtLeastOnce,
                ..Default::default()
            },
        );

        let outcome = bus
            .send(message, None, |_, _| async { Err::<(), _>("down".to_string()) })
            .await
            .unwrap();
        assert_eq!(outcome.queued_for_retry, vec!["a2".to_string()]);
    }

    #[tokio::test]
    async fn exactly_once_propagates_failure_to_caller() {
        let bus = MessageBus::default();
        let message = Message::new(
            "ping",
            "a1",
            vec!["a2".to_string()],
            vec![],
            "text/plain",
            SendOptions {
                reliability: Reliability::ExactlyOnce,
                ..Default::default()
            },
        );

        let result = bus
            .send(message, None, |_, _| async { Err::<(), _>("down".to_string()) })
            .await;
        assert!(matches!(result, Err(OrchestratorError::DeliveryFailure(_))));
    }

    #[tokio::test]
    async fn retry_tick_dead_letters_exhausted_deliveries() {
        let bus = MessageBus::new(BusConfig {
            retry: RetryConfig {
                max_attempts: 1,
                base_backoff: std::time::Duration::from_secs(0),
                ..Default::default()
            },
            ..Default::default()
        });
        bus.create_queue(Queue::new("dlq", QueueType::Fifo, DeliveryMode::AtMostOnce, 10))
            .await;

        let message = Message::new(
            "ping",
            "a1",
            vec!["a2".to_string()],
            vec![],
            "text/plain",
            SendOptions {
                reliability: Reliability::AtLeastOnce,
                ..Default::default()
            },
        );
        bus.send(message, None, |_, _| async { Err::<(), _>("down".to_string()) })
            .await
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let attempts = attempts.clone();
            bus.run_retry_tick("dlq", move |_, _| {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("still down".to_string())
                }
            })
            .await;
        }

        assert_eq!(bus.dead_letter_count("dlq").await, Some(1));
    }

    #[tokio::test]
    async fn send_drops_messages_denied_by_channel_filter() {
        let bus = MessageBus::default();
        let mut channel = Channel::new("room", ChannelType::Broadcast);
        channel.join("a2");
        channel.filters.push(Filter {
            field: "msg_type".to_string(),
            operator: FilterOperator::Eq,
            value: "spam".to_string(),
            action: FilterAction::Deny,
            priority: 10,
        });
        bus.create_channel(channel).await;

        let message = Message::new("spam", "a1", vec![], vec![], "text/plain", SendOptions::default());

        let outcome = bus
            .send(message, Some("room"), |_, _| async { Ok(()) })
            .await
            .unwrap();
        assert!(outcome.delivered.is_empty());

        let stats = bus.channel("room").await.unwrap().stats;
        assert_eq!(stats.messages_filtered, 1);
    }

    #[tokio::test]
    async fn priority_queue_ordering_matches_scenario() {
        let mut q = Queue::new("q", QueueType::Priority, DeliveryMode::AtMostOnce, 10);
        for p in [
            MessagePriority::Low,
            MessagePriority::Critical,
            MessagePriority::Normal,
            MessagePriority::High,
        ] {
            q.push(Message::new(
                "t",
                "s",
                vec!["r".to_string()],
                vec![],
                "text/plain",
                SendOptions {
                    priority: p,
                    ..Default::default()
                },
            ));
        }
        let order: Vec<_> = std::iter::from_fn(|| q.pop_ready()).map(|m| m.priority).collect();
        assert_eq!(
            order,
            vec![
                MessagePriority::Critical,
                MessagePriority::High,
                MessagePriority::Normal,
                MessagePriority::Low
            ]
        );
    }
}
