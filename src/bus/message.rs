use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    BestEffort,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOptions {
    pub priority: MessagePriority,
    pub reliability: Reliability,
    pub ttl_ms: Option<u64>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub ordered: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            priority: MessagePriority::Normal,
            reliability: Reliability::BestEffort,
            ttl_ms: None,
            correlation_id: None,
            reply_to: None,
            ordered: false,
        }
    }
}

/// A single addressed piece of traffic on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub msg_type: String,
    pub sender: String,
    pub receivers: Vec<String>,
    pub content: Vec<u8>,
    pub content_type: String,

    pub priority: MessagePriority,
    pub reliability: Reliability,
    pub ttl_ms: Option<u64>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,

    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub route: Vec<String>,
}

impl Message {
    pub fn new(
        msg_type: impl Into<String>,
        sender: impl Into<String>,
        receivers: Vec<String>,
        content: Vec<u8>,
        content_type: impl Into<String>,
        options: SendOptions,
    ) -> Self {
        let sent_at = chrono::Utc::now();
        let expires_at = options
            .ttl_ms
            .map(|ms| sent_at + chrono::Duration::milliseconds(ms as i64));
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            msg_type: msg_type.into(),
            sender: sender.into(),
            receivers,
            content,
            content_type: content_type.into(),
            priority: options.priority,
            reliability: options.reliability,
            ttl_ms: options.ttl_ms,
            correlation_id: options.correlation_id,
            reply_to: options.reply_to,
            sent_at,
            expires_at,
            route: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|e| e <= chrono::Utc::now())
    }

    pub fn record_hop(&mut self, hop: impl Into<String>) {
        self.route.push(hop.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_message_detected_from_ttl() {
        let mut msg = Message::new(
            "ping",
            "a1",
            vec!["a2".to_string()],
            vec![],
            "application/octet-stream",
            SendOptions {
                ttl_ms: Some(0),
                ..Default::default()
            },
        );
        msg.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        assert!(msg.is_expired());
    }

    #[test]
    fn message_without_ttl_never_expires() {
        let msg = Message::new(
            "ping",
            "a1",
            vec!["a2".to_string()],
            vec![],
            "application/octet-stream",
            SendOptions::default(),
        );
        assert!(!msg.is_expired());
    }
}
