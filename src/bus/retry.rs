use super::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub tick_interval: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingDelivery {
    message: Message,
    receiver: String,
    attempts: u32,
    next_attempt_at: chrono::DateTime<chrono::Utc>,
}

/// Tracks deliveries awaiting acknowledgment or retry. A dedicated
/// periodic worker calls [`RetryScheduler::due`] on a tick and resends
/// what it returns; entries that exceed `max_attempts` are reported by
/// [`RetryScheduler::drain_exhausted`] for dead-lettering.
#[derive(Default)]
pub struct RetryScheduler {
    config_tick: Duration,
    pending: HashMap<(String, String), PendingDelivery>,
    exhausted: Vec<(Message, String)>,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config_tick: config.tick_interval,
            pending: HashMap::new(),
            exhausted: Vec::new(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.config_tick
    }

    pub fn schedule(&mut self, message: Message, receiver: String, backoff: Duration) {
        let key = (message.id.clone(), receiver.clone());
        let next_attempt_at = chrono::Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();
        self.pending
            .entry(key)
            .and_modify(|p| {
                p.attempts += 1;
                p.next_attempt_at = next_attempt_at;
            })
            .or_insert(PendingDelivery {
                message,
                receiver,
                attempts: 1,
                next_attempt_at,
            });
    }

    pub fn resolve(&mut self, message_id: &str, receiver: &str) {
        self.pending
            .remove(&(message_id.to_string(), receiver.to_string()));
    }

    /// Deliveries whose backoff window has elapsed and are within
    /// `max_attempts`; callers should re-attempt delivery and call
    /// either [`RetryScheduler::resolve`] or [`RetryScheduler::schedule`]
    /// again depending on the outcome.
    pub fn due(&self, max_attempts: u32) -> Vec<(Message, String)> {
        let now = chrono::Utc::now();
        self.pending
            .values()
            .filter(|p| p.next_attempt_at <= now && p.attempts <= max_attempts)
            .map(|p| (p.message.clone(), p.receiver.clone()))
            .collect()
    }

    /// Moves entries that exceeded `max_attempts` out of the pending
    /// set and into the exhausted list, returning them for
    /// dead-lettering.
    pub fn drain_exhausted(&mut self, max_attempts: u32) -> Vec<(Message, String)> {
        let exhausted_keys: Vec<(String, String)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.attempts > max_attempts)
            .map(|(k, _)| k.clone())
            .collect();

        let mut out = Vec::new();
        for key in exhausted_keys {
            if let Some(p) = self.pending.remove(&key) {
                out.push((p.message.clone(), p.receiver.clone()));
                self.exhausted.push((p.message, p.receiver));
            }
        }
        out
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
