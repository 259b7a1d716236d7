use crate::bus::message::Message;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport-level events surfaced to the bus by an [`AgentTransport`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Inbound(Message),
}

/// The connection an agent is reachable over. Implementations wrap
/// whatever carries bytes to the agent process (in-process channel,
/// websocket, subprocess stdio); the bus only depends on this trait.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn connect(&mut self, agent_id: &str) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
    async fn send_message(&mut self, message: Message) -> Result<()>;
    fn should_reconnect(&self, error: &crate::error::OrchestratorError) -> bool;
    fn mark_for_reconnect(&mut self);
}

/// An in-process transport backed by an mpsc channel, used for tests
/// and for agents running in the same process as the orchestrator.
pub struct InProcessTransport {
    agent_id: Option<String>,
    connected: bool,
    needs_reconnect: bool,
    outbound: mpsc::UnboundedSender<Message>,
}

impl InProcessTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                agent_id: None,
                connected: false,
                needs_reconnect: false,
                outbound: tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl AgentTransport for InProcessTransport {
    async fn connect(&mut self, agent_id: &str) -> Result<()> {
        self.agent_id = Some(agent_id.to_string());
        self.connected = true;
        self.needs_reconnect = false;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send_message(&mut self, message: Message) -> Result<()> {
        if !self.connected {
            return Err(crate::error::OrchestratorError::DeliveryFailure(
                "transport not connected".to_string(),
            ));
        }
        self.outbound
            .send(message)
            .map_err(|e| crate::error::OrchestratorError::DeliveryFailure(e.to_string()))
    }

    fn should_reconnect(&self, error: &crate::error::OrchestratorError) -> bool {
        error.is_retryable()
    }

    fn mark_for_reconnect(&mut self) {
        self.needs_reconnect = true;
        self.connected = false;
    }
}
