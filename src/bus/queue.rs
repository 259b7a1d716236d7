use super::message::{Message, MessagePriority};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueType {
    Fifo,
    Lifo,
    Priority,
    Delay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub message: Message,
    pub reason: String,
    pub dead_letter_timestamp: chrono::DateTime<chrono::Utc>,
}

/// A bounded, typed message queue. Insertion order depends on
/// `queue_type`; removal semantics depend on `delivery_mode`.
pub struct Queue {
    pub name: String,
    pub queue_type: QueueType,
    pub delivery_mode: DeliveryMode,
    pub capacity: usize,

    entries: VecDeque<(Message, Option<chrono::DateTime<chrono::Utc>>)>,
    /// Messages dequeued under at-least-once/exactly-once but not yet
    /// acked, keyed by message id.
    pending_ack: VecDeque<Message>,
    /// (message id, subscriber) pairs already delivered under
    /// exactly-once, so a redelivery attempt is recognized as a dup.
    exactly_once_seen: HashSet<(String, String)>,
    dead_letters: Vec<DeadLetterEntry>,
}

impl Queue {
    pub fn new(name: impl Into<String>, queue_type: QueueType, delivery_mode: DeliveryMode, capacity: usize) -> Self {
        Self {
            name: name.into(),
            queue_type,
            delivery_mode,
            capacity,
            entries: VecDeque::new(),
            pending_ack: VecDeque::new(),
            exactly_once_seen: HashSet::new(),
            dead_letters: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Inserts `message`, returning `false` (and routing to the dead
    /// letter store) if the queue is at capacity.
    pub fn push(&mut self, message: Message) -> bool {
        if self.is_full() {
            self.dead_letter(message, "queue_full");
            return false;
        }

        match self.queue_type {
            QueueType::Fifo => self.entries.push_back((message, None)),
            QueueType::Lifo => self.entries.push_front((message, None)),
            QueueType::Priority => {
                let pos = self
                    .entries
                    .iter()
                    .position(|(m, _)| m.priority < message.priority)
                    .unwrap_or(self.entries.len());
                self.entries.insert(pos, (message, None));
            }
            QueueType::Delay => {
                let deliver_at = message.sent_at
                    + chrono::Duration::milliseconds(message.ttl_ms.unwrap_or(0) as i64);
                let pos = self
                    .entries
                    .iter()
                    .position(|(_, at)| at.is_some_and(|t| t > deliver_at))
                    .unwrap_or(self.entries.len());
                self.entries.insert(pos, (message, Some(deliver_at)));
            }
        }
        true
    }

    fn ordered_priority(a: MessagePriority) -> u8 {
        match a {
            MessagePriority::Critical => 3,
            MessagePriority::High => 2,
            MessagePriority::Normal => 1,
            MessagePriority::Low => 0,
        }
    }

    /// Returns the next deliverable message without removing it under
    /// reliable delivery modes; removes it immediately under
    /// `AtMostOnce`. Delay-queue entries are withheld until their
    /// scheduled time.
    pub fn pop_ready(&mut self) -> Option<Message> {
        let idx = match self.queue_type {
            QueueType::Delay => self
                .entries
                .iter()
                .position(|(_, at)| at.map_or(true, |t| t <= chrono::Utc::now()))?,
            _ => 0,
        };
        if idx >= self.entries.len() {
            return None;
        }
        let (message, _) = self.entries.remove(idx)?;

        match self.delivery_mode {
            DeliveryMode::AtMostOnce => Some(message),
            DeliveryMode::AtLeastOnce | DeliveryMode::ExactlyOnce => {
                self.pending_ack.push_back(message.clone());
                Some(message)
            }
        }
    }

    /// Acknowledges `message_id` for `subscriber`, removing it from the
    /// pending-ack set. Returns `true` if this ack resolved a pending
    /// delivery.
    pub fn ack(&mut self, message_id: &str, subscriber: &str) -> bool {
        let before = self.pending_ack.len();
        self.pending_ack.retain(|m| m.id != message_id);
        if self.delivery_mode == DeliveryMode::ExactlyOnce {
            self.exactly_once_seen
                .insert((message_id.to_string(), subscriber.to_string()));
        }
        self.pending_ack.len() != before
    }

    pub fn already_delivered(&self, message_id: &str, subscriber: &str) -> bool {
        self.exactly_once_seen
            .contains(&(message_id.to_string(), subscriber.to_string()))
    }

    /// Requeues unacked messages (for retry) and returns those whose
    /// retry budget (tracked by the caller) has been exceeded for
    /// dead-lettering. This queue only requeues; retry-count tracking
    /// lives in the retry scheduler.
    pub fn requeue_unacked(&mut self) -> Vec<Message> {
        let unacked: Vec<Message> = self.pending_ack.drain(..).collect();
        for msg in &unacked {
            self.push(msg.clone());
        }
        unacked
    }

    pub fn dead_letter(&mut self, message: Message, reason: &str) {
        self.dead_letters.push(DeadLetterEntry {
            message,
            reason: reason.to_string(),
            dead_letter_timestamp: chrono::Utc::now(),
        });
    }

    pub fn dead_letters(&self) -> &[DeadLetterEntry] {
        &self.dead_letters
    }
}

#[cfg(test)]
mod tests {
    use super::super::message::SendOptions;
    use super::*;

    fn msg(priority: MessagePriority) -> Message {
        Message::new(
            "t",
            "s",
            vec!["r".to_string()],
            vec![],
            "text/plain",
            SendOptions {
                priority,
                ..Default::default()
            },
        )
    }

    #[test]
    fn priority_queue_dequeues_highest_first() {
        let mut q = Queue::new("q", QueueType::Priority, DeliveryMode::AtMostOnce, 10);
        q.push(msg(MessagePriority::Low));
        q.push(msg(MessagePriority::Critical));
        q.push(msg(MessagePriority::Normal));
        q.push(msg(MessagePriority::High));

        assert_eq!(q.pop_ready().unwrap().priority, MessagePriority::Critical);
        assert_eq!(q.pop_ready().unwrap().priority, MessagePriority::High);
        assert_eq!(q.pop_ready().unwrap().priority, MessagePriority::Normal);
        assert_eq!(q.pop_ready().unwrap().priority, MessagePriority::Low);
    }

    #[test]
    fn lifo_dequeues_most_recent_first() {
        let mut q = Queue::new("q", QueueType::Lifo, DeliveryMode::AtMostOnce, 10);
        let first = msg(MessagePriority::Normal);
        let first_id = first.id.clone();
        q.push(first);
        let second = msg(MessagePriority::Normal);
        let second_id = second.id.clone();
        q.push(second);

        assert_eq!(q.pop_ready().unwrap().id, second_id);
        assert_eq!(q.pop_ready().unwrap().id, first_id);
    }

    #[test]
    fn full_queue_dead_letters_new_pushes() {
        let mut q = Queue::new("q", QueueType::Fifo, DeliveryMode::AtMostOnce, 1);
        assert!(q.push(msg(MessagePriority::Normal)));
        assert!(!q.push(msg(MessagePriority::Normal)));
        assert_eq!(q.dead_letters().len(), 1);
    }

    #[test]
    fn at_least_once_keeps_message_until_acked() {
        let mut q = Queue::new("q", QueueType::Fifo, DeliveryMode::AtLeastOnce, 10);
        let m = msg(MessagePriority::Normal);
        let id = m.id.clone();
        q.push(m);
        let delivered = q.pop_ready().unwrap();
        assert_eq!(delivered.id, id);
        assert!(q.ack(&id, "sub"));
    }

    #[test]
    fn exactly_once_tracks_dedupe_per_subscriber() {
        let mut q = Queue::new("q", QueueType::Fifo, DeliveryMode::ExactlyOnce, 10);
        let m = msg(MessagePriority::Normal);
        let id = m.id.clone();
        q.push(m);
        q.pop_ready();
        assert!(!q.already_delivered(&id, "sub"));
        q.ack(&id, "sub");
        assert!(q.already_delivered(&id, "sub"));
    }
}
