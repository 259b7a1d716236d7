mod retry;

pub use retry::RetryPolicy;

use crate::circuit::CircuitBreakerSet;
use crate::conflict::{ConflictResolver, ResolutionStrategy};
use crate::error::{OrchestratorError, Result};
use crate::graph::DependencyGraph;
use crate::models::{AgentId, AgentProfile, Task, TaskId, TaskStatus};
use crate::scheduler::WorkStealingScheduler;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_queue_size: usize,
    pub max_concurrent_tasks: u32,
    pub retention: chrono::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_concurrent_tasks: 256,
            retention: chrono::Duration::hours(24),
        }
    }
}

/// Partial update applied to a task by [`TaskEngine::update`]. Fields
/// left `None` are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub priority: Option<u8>,
    pub tags: Option<HashSet<String>>,
    pub metadata: Option<HashMap<String, String>>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub pending: usize,
    pub queued: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// The canonical task state machine. Drives tasks through
/// pending -> queued -> assigned -> running -> terminal, consulting the
/// dependency graph for readiness, the scheduler for agent selection,
/// and the circuit breaker set to avoid assigning work to a fenced-off
/// agent. Owns its task and agent maps exclusively; every mutation goes
/// through the methods below so per-task-id ordering is preserved.
pub struct TaskEngine {
    config: EngineConfig,
    tasks: RwLock<HashMap<TaskId, Task>>,
    agents: RwLock<HashMap<AgentId, AgentProfile>>,
    queue: RwLock<VecDeque<TaskId>>,
    running_count: AtomicU32,

    pub graph: DependencyGraph,
    pub circuits: CircuitBreakerSet,
    pub scheduler: WorkStealingScheduler,
    pub conflicts: ConflictResolver,
    pub retry_policy: RetryPolicy,
}

impl TaskEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tasks: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            queue: RwLock::new(VecDeque::new()),
            running_count: AtomicU32::new(0),
            graph: DependencyGraph::new(),
            circuits: CircuitBreakerSet::default(),
            scheduler: WorkStealingScheduler::default(),
            conflicts: ConflictResolver::new(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub async fn register_agent(&self, agent: AgentProfile) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    pub async fn get_agent(&self, id: &AgentId) -> Option<AgentProfile> {
        self.agents.read().await.get(id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<AgentProfile> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Registers a new task and admits it to the pending queue.
    pub async fn create(&self, task: Task) -> Result<TaskId> {
        {
            let queue = self.queue.read().await;
            if queue.len() >= self.config.max_queue_size {
                return Err(OrchestratorError::capacity("task queue is full"));
            }
        }

        self.graph.add(&task).await?;
        let id = task.id.clone();

        self.tasks.write().await.insert(id.clone(), task);
        self.enqueue(&id).await;
        Ok(id)
    }

    async fn enqueue(&self, id: &TaskId) {
        let mut tasks = self.tasks.write().await;
        if let Some(t) = tasks.get_mut(id) {
            t.status = TaskStatus::Queued;
        }
        drop(tasks);

        let mut queue = self.queue.write().await;
        queue.push_back(id.clone());
        let tasks = self.tasks.read().await;
        let mut entries: Vec<TaskId> = queue.drain(..).collect();
        entries.sort_by(|a, b| {
            let pa = tasks.get(a).map(|t| t.priority).unwrap_or(0);
            let pb = tasks.get(b).map(|t| t.priority).unwrap_or(0);
            pb.cmp(&pa)
        });
        queue.extend(entries);
    }

    pub async fn get(&self, id: &TaskId) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Applies `fields` to a task in place. Fields left unset in the
    /// update are left unchanged. Rejected once the task has reached a
    /// terminal state; a terminal task's fields are closed for editing.
    pub async fn update(&self, id: &TaskId, fields: TaskUpdate) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))?;
        if task.status.is_terminal() {
            return Err(OrchestratorError::conflict(format!(
                "task {id} is {:?} and can no longer be updated",
                task.status
            )));
        }

        if let Some(priority) = fields.priority {
            task.priority = priority.clamp(1, 10);
        }
        if let Some(tags) = fields.tags {
            task.tags = tags;
        }
        if let Some(metadata) = fields.metadata {
            task.metadata = metadata;
        }
        if let Some(timeout_ms) = fields.timeout_ms {
            task.timeout_ms = timeout_ms;
        }

        let updated = task.clone();
        let priority_changed = fields.priority.is_some();
        drop(tasks);

        if priority_changed {
            let mut queue = self.queue.write().await;
            if queue.contains(id) {
                let mut entries: Vec<TaskId> = queue.drain(..).collect();
                let tasks = self.tasks.read().await;
                entries.sort_by(|a, b| {
                    let pa = tasks.get(a).map(|t| t.priority).unwrap_or(0);
                    let pb = tasks.get(b).map(|t| t.priority).unwrap_or(0);
                    pb.cmp(&pa)
                });
                queue.extend(entries);
            }
        }

        debug!(task = %id, "task updated");
        Ok(updated)
    }

    /// Picks the next ready, queued task and an eligible agent for it,
    /// transitioning `queued -> assigned`. If `preferred_agent` is
    /// given it is used directly (subject to capacity and circuit
    /// state); otherwise the scheduler scores all registered agents.
    pub async fn assign(&self, id: &TaskId, preferred_agent: Option<&AgentId>) -> Result<AgentId> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get(id)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))?
            .clone();

        if !self.graph.is_ready(id).await {
            return Err(OrchestratorError::conflict(format!(
                "task {id} has unsatisfied dependencies"
            )));
        }

        let mut agents = self.agents.write().await;

        let chosen_id = if let Some(preferred) = preferred_agent {
            agents
                .get(preferred)
                .filter(|a| a.has_capacity())
                .map(|a| a.id.clone())
                .ok_or_else(|| OrchestratorError::capacity("preferred agent has no capacity"))?
        } else {
            let snapshot: Vec<AgentProfile> = agents.values().cloned().collect();
            let chosen = self
                .scheduler
                .select_agent(&task, &snapshot)
                .ok_or_else(|| OrchestratorError::not_found("no eligible agent for task"))?;
            chosen.id.clone()
        };

        self.circuits.admit(&chosen_id).await?;

        if let Some(agent) = agents.get_mut(&chosen_id) {
            agent.start_task();
        }

        if let Some(t) = tasks.get_mut(id) {
            t.status = TaskStatus::Assigned;
            t.assigned_agent = Some(chosen_id.clone());
        }

        let mut queue = self.queue.write().await;
        queue.retain(|qid| qid != id);

        info!(task = %id, agent = %chosen_id, "task assigned");
        Ok(chosen_id)
    }

    pub async fn start_running(&self, id: &TaskId) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))?;
        if task.status != TaskStatus::Assigned {
            return Err(OrchestratorError::conflict(format!(
                "task {id} is not in assigned state"
            )));
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(chrono::Utc::now());
        self.running_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Marks a running task completed, releasing any dependents that
    /// just became ready back onto the queue.
    pub async fn complete(&self, id: &TaskId, agent_id: &AgentId) -> Result<Vec<TaskId>> {
        let duration_ms = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))?;
            if task.status != TaskStatus::Running {
                return Err(OrchestratorError::conflict(format!(
                    "task {id} is not running"
                )));
            }
            if task.assigned_agent.as_deref() != Some(agent_id.as_str()) {
                return Err(OrchestratorError::conflict(format!(
                    "task {id} is not assigned to {agent_id}"
                )));
            }
            task.status = TaskStatus::Completed;
            task.ended_at = Some(chrono::Utc::now());
            task.progress = 100;
            let started = task.started_at.unwrap_or_else(chrono::Utc::now);
            (chrono::Utc::now() - started).num_milliseconds().max(0) as f64
        };

        self.running_count.fetch_sub(1, Ordering::SeqCst);
        if let Some(agent) = self.agents.write().await.get_mut(agent_id) {
            agent.finish_task(duration_ms);
        }
        self.circuits.record_success(agent_id).await;

        let ready = self.graph.mark_completed(id).await;
        let mut queue = self.queue.write().await;
        for r in &ready {
            queue.push_back(r.clone());
        }
        let mut tasks = self.tasks.write().await;
        for r in &ready {
            if let Some(t) = tasks.get_mut(r) {
                t.status = TaskStatus::Queued;
            }
        }

        info!(task = %id, "task completed");
        Ok(ready)
    }

    /// Marks a running task failed. Retries if the retry budget is not
    /// exhausted (`running -> pending`, `retry_count += 1`); otherwise
    /// the task becomes terminally `failed`.
    pub async fn fail(&self, id: &TaskId, agent_id: &AgentId, error_kind: &str, message: &str) -> Result<TaskStatus> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))?;
        if task.status != TaskStatus::Running {
            return Err(OrchestratorError::conflict(format!(
                "task {id} is not running"
            )));
        }
        if task.assigned_agent.as_deref() != Some(agent_id.as_str()) {
            return Err(OrchestratorError::conflict(format!(
                "task {id} is not assigned to {agent_id}"
            )));
        }

        task.last_error = Some(crate::models::TaskError {
            kind: error_kind.to_string(),
            message: message.to_string(),
            occurred_at: chrono::Utc::now(),
        });

        drop(tasks);
        self.running_count.fetch_sub(1, Ordering::SeqCst);
        if let Some(agent) = self.agents.write().await.get_mut(agent_id) {
            agent.finish_task(0.0);
        }
        self.circuits.record_failure(agent_id).await;

        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).unwrap();
        if task.retries_exhausted() {
            task.status = TaskStatus::Failed;
            task.ended_at = Some(chrono::Utc::now());
            warn!(task = %id, "task failed, retries exhausted");
            Ok(TaskStatus::Failed)
        } else {
            let attempt = task.retry_count + 1;
            task.retry_count += 1;
            task.status = TaskStatus::Pending;
            task.assigned_agent = None;
            drop(tasks);

            let delay = self.retry_policy.delay_for(attempt);
            debug!(task = %id, ?delay, "backing off before retry");
            tokio::time::sleep(delay).await;

            self.enqueue(id).await;
            debug!(task = %id, retry_count = %self.get(id).await.map(|t| t.retry_count).unwrap_or(0), "task scheduled for retry");
            Ok(TaskStatus::Pending)
        }
    }

    /// Re-admits a `failed` task for another attempt. `reset_retries`
    /// zeroes the retry counter regardless of how many attempts
    /// remained; supplying `new_agent` only steers the next
    /// assignment, it does not by itself reset the counter.
    pub async fn retry(&self, id: &TaskId, reset_retries: bool) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))?;
        if task.status != TaskStatus::Failed {
            return Err(OrchestratorError::conflict(format!(
                "task {id} is not in failed state"
            )));
        }
        if reset_retries {
            task.retry_count = 0;
        }
        task.status = TaskStatus::Pending;
        task.assigned_agent = None;
        task.ended_at = None;
        drop(tasks);
        self.enqueue(id).await;
        Ok(())
    }

    /// Cancels a task for `reason`. With `cascade`, transitively cancels
    /// dependents that are not already in a terminal state; completed or
    /// previously-cancelled dependents are left untouched by the cascade.
    /// The root task itself must not already be terminal unless `force`
    /// is set, in which case an already-terminal root is left as-is and
    /// reported without error.
    pub async fn cancel(
        &self,
        id: &TaskId,
        reason: String,
        cascade: bool,
        force: bool,
    ) -> Result<Vec<TaskId>> {
        {
            let tasks = self.tasks.read().await;
            let task = tasks
                .get(id)
                .ok_or_else(|| OrchestratorError::not_found(format!("task {id}")))?;
            if task.status.is_terminal() && !force {
                return Err(OrchestratorError::conflict(format!(
                    "task {id} is already {:?}",
                    task.status
                )));
            }
        }

        let mut cancelled = Vec::new();
        let mut frontier = vec![id.clone()];

        while let Some(current) = frontier.pop() {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(&current) else {
                continue;
            };
            if task.status.is_terminal() {
                continue;
            }
            if let Some(agent_id) = task.assigned_agent.take() {
                drop(tasks);
                if let Some(agent) = self.agents.write().await.get_mut(&agent_id) {
                    agent.finish_task(0.0);
                }
                tasks = self.tasks.write().await;
            }
            let task = tasks.get_mut(&current).unwrap();
            task.status = TaskStatus::Cancelled;
            task.ended_at = Some(chrono::Utc::now());
            task.last_error = Some(crate::models::TaskError {
                kind: "cancelled".to_string(),
                message: reason.clone(),
                occurred_at: chrono::Utc::now(),
            });
            drop(tasks);

            let mut queue = self.queue.write().await;
            queue.retain(|qid| qid != &current);
            drop(queue);

            cancelled.push(current.clone());

            if cascade {
                let dependents = self.graph.dependents(&current).await;
                frontier.extend(dependents);
            }
        }

        info!(task = %id, %reason, cascade, "task cancelled");
        Ok(cancelled)
    }

    /// Runs one work-stealing tick: computes imbalance and applies the
    /// scheduler's recommended moves.
    pub async fn run_steal_tick(&self) -> Vec<crate::scheduler::StealOperation> {
        let agents: Vec<AgentProfile> = self.agents.read().await.values().cloned().collect();
        let tasks = self.tasks.read().await;

        let mut by_agent: HashMap<AgentId, Vec<Task>> = HashMap::new();
        for t in tasks.values() {
            if t.status == TaskStatus::Assigned {
                if let Some(agent_id) = &t.assigned_agent {
                    by_agent.entry(agent_id.clone()).or_default().push(t.clone());
                }
            }
        }
        drop(tasks);

        let ops = self.scheduler.plan_steals(&agents, &by_agent).await;
        for op in &ops {
            let mut tasks = self.tasks.write().await;
            if let Some(t) = tasks.get_mut(&op.task_id) {
                t.status = TaskStatus::Queued;
                t.assigned_agent = None;
            }
            drop(tasks);

            let mut agents = self.agents.write().await;
            if let Some(a) = agents.get_mut(&op.from_agent) {
                a.finish_task(0.0);
            }
            if let Some(a) = agents.get_mut(&op.to_agent) {
                a.start_task();
            }
            drop(agents);

            let mut tasks = self.tasks.write().await;
            if let Some(t) = tasks.get_mut(&op.task_id) {
                t.status = TaskStatus::Assigned;
                t.assigned_agent = Some(op.to_agent.clone());
            }
            drop(tasks);

            self.scheduler.record_steal(op.clone()).await;
        }
        ops
    }

    pub async fn retention_sweep(&self) -> usize {
        let cutoff = chrono::Utc::now() - self.config.retention;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| !(t.status.is_terminal() && t.ended_at.is_some_and(|e| e < cutoff)));
        before - tasks.len()
    }

    pub async fn stats(&self) -> EngineStats {
        let tasks = self.tasks.read().await;
        let mut stats = EngineStats::default();
        for t in tasks.values() {
            match t.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Assigned => stats.assigned += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

impl Default for TaskEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
