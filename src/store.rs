use crate::error::Result;
use crate::models::{Task, TaskStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persisted shape of a task, independent of the in-memory [`Task`]
/// representation so storage backends can evolve without touching the
/// engine's domain model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub task_type: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: u8,
    pub dependencies: String,
    pub metadata: String,
    pub progress: f32,
    pub created_at_epoch_ms: i64,
    pub assigned_agent: Option<String>,
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            task_type: task.task_type.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            dependencies: task.dependencies.iter().cloned().collect::<Vec<_>>().join(","),
            metadata: serde_json::to_string(&task.metadata).unwrap_or_default(),
            progress: task.progress,
            created_at_epoch_ms: task.created_at.timestamp_millis(),
            assigned_agent: task.assigned_agent.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub counts_by_status: HashMap<String, usize>,
    pub total: usize,
}

/// Durable persistence boundary consumed by the orchestrator. Callers
/// may assume read-your-writes after `save_task` returns.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save_task(&self, record: TaskRecord) -> Result<()>;
    async fn get_active_tasks(&self) -> Result<Vec<TaskRecord>>;
    async fn get_stats(&self) -> Result<StoreStats>;
}

/// Reference adapter used in tests and as the default when no durable
/// backend is configured. Not suitable for production: state is lost
/// on restart.
#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save_task(&self, record: TaskRecord) -> Result<()> {
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_active_tasks(&self) -> Result<Vec<TaskRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        let records = self.records.read().await;
        let mut counts_by_status: HashMap<String, usize> = HashMap::new();
        for record in records.values() {
            *counts_by_status.entry(format!("{:?}", record.status)).or_insert(0) += 1;
        }
        Ok(StoreStats {
            total: records.len(),
            counts_by_status,
        })
    }
}
