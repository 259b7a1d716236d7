use crate::bus::{BusConfig, Message, MessageBus, SendOptions};
use crate::circuit::CircuitBreakerMetrics;
use crate::engine::{EngineConfig, EngineStats, TaskEngine};
use crate::error::Result;
use crate::memory::{MemoryConfig, MemoryStore};
use crate::models::{AgentId, AgentProfile, Task, TaskId};
use crate::monitoring::MetricsSource;
use crate::store::{InMemoryTaskStore, TaskRecord, TaskStore};
use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub engine: EngineConfig,
    pub bus: BusConfig,
    pub memory: MemoryConfig,
    pub retry_tick_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            bus: BusConfig::default(),
            memory: MemoryConfig::default(),
            retry_tick_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStats {
    pub engine: EngineStats,
    pub circuits: Vec<CircuitBreakerMetrics>,
    pub memory_entries: usize,
    pub agents: usize,
}

/// Thin coordinator wiring the engine, bus, memory, and a persistence
/// store together. Each subsystem keeps exclusive ownership of its own
/// state; this type only routes calls and aggregates read-only views
/// for the HTTP surface.
pub struct Orchestrator {
    pub engine: TaskEngine,
    pub bus: MessageBus,
    pub memory: MemoryStore,
    pub tools: ToolRegistry,
    store: Arc<dyn TaskStore>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn TaskStore>) -> Self {
        Self {
            engine: TaskEngine::new(config.engine),
            bus: MessageBus::new(config.bus),
            memory: MemoryStore::new(config.memory),
            tools: ToolRegistry::new(),
            store,
        }
    }

    pub fn with_in_memory_store(config: OrchestratorConfig) -> Self {
        Self::new(config, Arc::new(InMemoryTaskStore::new()))
    }

    pub async fn register_agent(&self, agent: AgentProfile) {
        self.engine.register_agent(agent).await;
    }

    /// Submits a task to the engine and persists it.
    pub async fn submit_task(&self, task: Task) -> Result<TaskId> {
        let record = TaskRecord::from(&task);
        let id = self.engine.create(task).await?;
        self.store.save_task(record).await?;
        Ok(id)
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.engine.get(id).await
    }

    /// Assigns the task to an agent and persists the resulting state.
    pub async fn assign_task(&self, id: &TaskId, preferred_agent: Option<&AgentId>) -> Result<AgentId> {
        let agent_id = self.engine.assign(id, preferred_agent).await?;
        let task = self.engine.get(id).await?;
        self.store.save_task(TaskRecord::from(&task)).await?;
        Ok(agent_id)
    }

    pub async fn complete_task(&self, id: &TaskId, agent_id: &AgentId) -> Result<Vec<TaskId>> {
        let ready = self.engine.complete(id, agent_id).await?;
        let task = self.engine.get(id).await?;
        self.store.save_task(TaskRecord::from(&task)).await?;
        Ok(ready)
    }

    /// Notifies an agent's peers that a task completed, best-effort,
    /// over the message bus.
    pub async fn announce_completion<F, Fut>(&self, task: &Task, channel: &str, deliver: F) -> Result<()>
    where
        F: Fn(Message, String) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<(), String>>,
    {
        let message = Message::new(
            "task.completed",
            task.assigned_agent.clone().unwrap_or_default(),
            vec![],
            task.id.clone().into_bytes(),
            "text/plain",
            SendOptions::default(),
        );
        self.bus.send(message, Some(channel), deliver).await?;
        Ok(())
    }

    pub async fn stats(&self) -> SystemStats {
        SystemStats {
            engine: self.engine.stats().await,
            circuits: self.engine.circuits.all_metrics().await,
            memory_entries: self.memory.entry_count().await,
            agents: self.engine.list_agents().await.len(),
        }
    }

    /// Background loop driving periodic housekeeping: the bus retry
    /// manager and the engine's retention sweep. Runs until `shutdown`
    /// resolves.
    pub async fn run(
        self: Arc<Self>,
        tick_interval: Duration,
        dead_letter_queue: &'static str,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.bus
                        .run_retry_tick(dead_letter_queue, |_message, receiver| async move {
                            error!(receiver = %receiver, "no transport configured for retry delivery");
                            Err("no transport".to_string())
                        })
                        .await;
                    let swept = self.engine.retention_sweep().await;
                    if swept > 0 {
                        info!(count = swept, "retention sweep removed terminal tasks");
                    }
                }
                _ = &mut shutdown => {
                    info!("orchestrator background loop shutting down");
                    break;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MetricsSource for Orchestrator {
    async fn circuit_breakers(&self) -> Vec<CircuitBreakerMetrics> {
        self.engine.circuits.all_metrics().await
    }

    async fn engine_stats(&self) -> EngineStats {
        self.engine.stats().await
    }

    async fn bus_queue_depths(&self) -> Vec<(String, usize)> {
        self.bus.queue_depths().await
    }

    async fn bus_dead_letter_counts(&self) -> Vec<(String, usize)> {
        self.bus.dead_letter_counts().await
    }

    async fn memory_entry_count(&self) -> usize {
        self.memory.entry_count().await
    }
}
