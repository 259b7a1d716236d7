use super::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    Direct,
    Broadcast,
    Multicast,
    Topic,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Contains,
    Matches,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterAction {
    Allow,
    Deny,
    Modify,
    Route,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: String,
    pub action: FilterAction,
    pub priority: i32,
}

/// An unconditional processing step run on every message that passes
/// the filter chain, in priority order. Unlike a [`Filter`], a
/// middleware never drops a message; it only observes or stamps it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Middleware {
    pub name: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    pub allowed_senders: HashSet<String>,
    pub allowed_receivers: HashSet<String>,
    pub banned: HashSet<String>,
}

impl AccessControl {
    pub fn can_join(&self, agent_id: &str) -> bool {
        if self.banned.contains(agent_id) {
            return false;
        }
        if self.allowed_senders.is_empty() && self.allowed_receivers.is_empty() {
            return true;
        }
        self.allowed_senders.contains(agent_id) || self.allowed_receivers.contains(agent_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_filtered: u64,
}

/// A named addressable group of participants with a routing mode and
/// an access/filter policy. Channels never hold messages themselves;
/// delivery and queuing are the dispatcher's and queue's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub channel_type: ChannelType,
    pub participants: HashSet<String>,
    pub access_control: AccessControl,
    pub filters: Vec<Filter>,
    pub middleware: Vec<Middleware>,
    pub stats: ChannelStats,
}

impl Channel {
    pub fn new(name: impl Into<String>, channel_type: ChannelType) -> Self {
        Self {
            name: name.into(),
            channel_type,
            participants: HashSet::new(),
            access_control: AccessControl::default(),
            filters: Vec::new(),
            middleware: Vec::new(),
            stats: ChannelStats::default(),
        }
    }

    pub fn join(&mut self, agent_id: impl Into<String>) -> bool {
        let agent_id = agent_id.into();
        if !self.access_control.can_join(&agent_id) {
            return false;
        }
        self.participants.insert(agent_id);
        true
    }

    pub fn leave(&mut self, agent_id: &str) {
        self.participants.remove(agent_id);
    }

    /// Resolves the recipient set for `message` sent on this channel by
    /// `sender`, per the channel's type semantics.
    pub fn resolve_receivers(&self, sender: &str) -> Vec<String> {
        match self.channel_type {
            ChannelType::Broadcast => self
                .participants
                .iter()
                .filter(|p| p.as_str() != sender)
                .cloned()
                .collect(),
            ChannelType::Multicast => self.participants.iter().cloned().collect(),
            ChannelType::Direct | ChannelType::Topic | ChannelType::Queue => {
                self.participants.iter().cloned().collect()
            }
        }
    }

    /// Applies the filter chain in priority order. Returns `None` if a
    /// `Deny` matched; otherwise the (possibly modified) message.
    pub fn apply_filters(&mut self, mut message: Message) -> Option<Message> {
        let mut ordered: Vec<Filter> = self.filters.clone();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        for filter in &ordered {
            if !Self::matches(filter, &message) {
                continue;
            }
            match filter.action {
                FilterAction::Allow => return Some(message),
                FilterAction::Deny => {
                    self.stats.messages_filtered += 1;
                    return None;
                }
                FilterAction::Modify => {
                    message.record_hop(format!("filter:{}", filter.field));
                }
                FilterAction::Route => {
                    // Redirects and stops evaluating the rest of the chain,
                    // unlike Modify which keeps falling through.
                    message.record_hop(format!("route:{}", filter.value));
                    return Some(message);
                }
            }
        }
        Some(message)
    }

    /// Runs the middleware chain in priority order, stamping a hop for
    /// each entry. Middleware never drops a message.
    pub fn apply_middleware(&self, mut message: Message) -> Message {
        let mut ordered: Vec<Middleware> = self.middleware.clone();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
        for mw in &ordered {
            message.record_hop(format!("mw:{}", mw.name));
        }
        message
    }

    fn matches(filter: &Filter, message: &Message) -> bool {
        let field_value = match filter.field.as_str() {
            "msg_type" => message.msg_type.clone(),
            "sender" => message.sender.clone(),
            "content_type" => message.content_type.clone(),
            _ => return false,
        };
        match filter.operator {
            FilterOperator::Eq => field_value == filter.value,
            FilterOperator::Ne => field_value != filter.value,
            FilterOperator::Contains => field_value.contains(&filter.value),
            FilterOperator::Matches => regex::Regex::new(&filter.value)
                .map(|re| re.is_match(&field_value))
                .unwrap_or(false),
            FilterOperator::In => filter.value.split(',').any(|v| v == field_value),
            FilterOperator::Gt | FilterOperator::Lt => false,
        }
    }
}
