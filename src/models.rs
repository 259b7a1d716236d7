use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type TaskId = String;
pub type AgentId = String;

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Current status of a task in the processing pipeline.
///
/// Transitions follow `pending -> queued -> assigned -> running ->
/// {completed | failed | cancelled}`, with `failed -> pending` on retry
/// and `assigned -> pending` on reassignment. `completed` and
/// `cancelled` are terminal; `failed` is terminal only once retries are
/// exhausted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A prerequisite error captured when a task fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: String,
    pub message: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

/// A unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub description: String,
    pub priority: u8,
    pub tags: HashSet<String>,
    pub metadata: HashMap<String, String>,

    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_count: u32,
    pub dependencies: Vec<TaskId>,
    pub required_capabilities: HashSet<String>,

    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<TaskError>,
    pub progress: u8,
}

impl Task {
    pub fn new(task_type: impl Into<String>, description: impl Into<String>, priority: u8) -> Self {
        Self {
            id: new_id("task"),
            task_type: task_type.into(),
            description: description.into(),
            priority: priority.clamp(1, 10),
            tags: HashSet::new(),
            metadata: HashMap::new(),
            timeout_ms: 30_000,
            max_retries: 0,
            retry_count: 0,
            dependencies: Vec::new(),
            required_capabilities: HashSet::new(),
            status: TaskStatus::Pending,
            assigned_agent: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
            last_error: None,
            progress: 0,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = String>) -> Self {
        self.required_capabilities = caps.into_iter().collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Runtime status of an agent known to the scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Offline,
}

/// A registered worker capable of executing tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub agent_type: String,
    pub capabilities: HashSet<String>,
    pub priority: u8,
    pub max_concurrent_tasks: u32,

    pub status: AgentStatus,
    pub current_task_count: u32,
    pub avg_task_duration_ms: f64,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
}

impl AgentProfile {
    pub fn new(agent_type: impl Into<String>, max_concurrent_tasks: u32) -> Self {
        Self {
            id: new_id("agent"),
            agent_type: agent_type.into(),
            capabilities: HashSet::new(),
            priority: 5,
            max_concurrent_tasks,
            status: AgentStatus::Idle,
            current_task_count: 0,
            avg_task_duration_ms: 0.0,
            last_heartbeat: chrono::Utc::now(),
        }
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = String>) -> Self {
        self.capabilities = caps.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn has_capacity(&self) -> bool {
        self.current_task_count < self.max_concurrent_tasks
    }

    pub fn load(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 1.0;
        }
        self.current_task_count as f64 / self.max_concurrent_tasks as f64
    }

    pub fn start_task(&mut self) {
        self.current_task_count += 1;
        if self.current_task_count >= self.max_concurrent_tasks {
            self.status = AgentStatus::Busy;
        }
    }

    pub fn finish_task(&mut self, duration_ms: f64) {
        self.current_task_count = self.current_task_count.saturating_sub(1);
        let completed = (self.current_task_count + 1) as f64;
        self.avg_task_duration_ms =
            (self.avg_task_duration_ms * (completed - 1.0) + duration_ms) / completed;
        if self.current_task_count < self.max_concurrent_tasks {
            self.status = AgentStatus::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_pending() {
        let t = Task::new("build", "compile the crate", 5);
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.retry_count, 0);
        assert!(!t.retries_exhausted());
    }

    #[test]
    fn priority_is_clamped() {
        let t = Task::new("build", "x", 50);
        assert_eq!(t.priority, 10);
        let t2 = Task::new("build", "x", 0);
        assert_eq!(t2.priority, 1);
    }

    #[test]
    fn agent_capacity_tracks_concurrent_tasks() {
        let mut agent = AgentProfile::new("worker", 2);
        assert!(agent.has_capacity());
        agent.start_task();
        assert!(agent.has_capacity());
        agent.start_task();
        assert!(!agent.has_capacity());
        assert_eq!(agent.status, AgentStatus::Busy);
        agent.finish_task(100.0);
        assert!(agent.has_capacity());
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[test]
    fn avg_duration_is_running_average() {
        let mut agent = AgentProfile::new("worker", 5);
        agent.start_task();
        agent.finish_task(100.0);
        agent.start_task();
        agent.finish_task(200.0);
        assert_eq!(agent.avg_task_duration_ms, 150.0);
    }
}
