use crate::models::{AgentId, AgentProfile, Task};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub capability_weight: f64,
    pub load_weight: f64,
    pub priority_weight: f64,
    pub steal_threshold: f64,
    pub max_steal_batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capability_weight: 2.0,
            load_weight: 1.5,
            priority_weight: 0.5,
            steal_threshold: 1.0,
            max_steal_batch: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealOperation {
    pub task_id: String,
    pub from_agent: AgentId,
    pub to_agent: AgentId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_agents: usize,
    pub overloaded_agents: usize,
    pub underloaded_agents: usize,
    pub successful_steals: u64,
    pub avg_tasks_per_agent: f64,
    pub recent_steals: Vec<StealOperation>,
}

fn capability_match(task: &Task, agent: &AgentProfile) -> f64 {
    if task.required_capabilities.is_empty() {
        return 1.0;
    }
    let matched = task
        .required_capabilities
        .intersection(&agent.capabilities)
        .count();
    matched as f64 / task.required_capabilities.len() as f64
}

/// Maintains per-agent workload stats, picks the best agent for a
/// task, and periodically rebalances load by stealing tasks from
/// overloaded agents to underloaded ones.
///
/// Owned by the task engine; the engine is the only writer of agent
/// workload state, the scheduler only reads it through snapshots
/// passed to [`WorkStealingScheduler::select_agent`].
pub struct WorkStealingScheduler {
    config: SchedulerConfig,
    stats: RwLock<SchedulerStats>,
    recent_steals: RwLock<Vec<StealOperation>>,
}

impl WorkStealingScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            stats: RwLock::new(SchedulerStats::default()),
            recent_steals: RwLock::new(Vec::new()),
        }
    }

    fn score(&self, task: &Task, agent: &AgentProfile) -> f64 {
        capability_match(task, agent) * self.config.capability_weight
            - agent.load() * self.config.load_weight
            + (agent.priority as f64 / 10.0) * self.config.priority_weight
    }

    /// Picks the best eligible agent for `task` among `candidates`.
    /// Agents without capacity or with a negative score are excluded.
    /// Ties break by lower load, then lower id.
    pub fn select_agent<'a>(
        &self,
        task: &Task,
        candidates: &'a [AgentProfile],
    ) -> Option<&'a AgentProfile> {
        candidates
            .iter()
            .filter(|a| a.has_capacity())
            .map(|a| (a, self.score(task, a)))
            .filter(|(_, score)| *score >= 0.0)
            .min_by(|(a, score_a), (b, score_b)| {
                score_b
                    .partial_cmp(score_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.load().partial_cmp(&b.load()).unwrap_or(std::cmp::Ordering::Equal))
                    .then(a.id.cmp(&b.id))
            })
            .map(|(agent, _)| agent)
    }

    /// Computes which overloaded agents should hand tasks to which
    /// underloaded agents, given each agent's current task-count
    /// snapshot and the tasks currently assigned to it. Returns the
    /// chosen steal operations; applying them is the caller's
    /// (task engine's) responsibility since only it may mutate task
    /// and agent state.
    pub async fn plan_steals(
        &self,
        agents: &[AgentProfile],
        tasks_by_agent: &HashMap<AgentId, Vec<Task>>,
    ) -> Vec<StealOperation> {
        if agents.len() < 2 {
            return Vec::new();
        }

        let counts: Vec<f64> = agents.iter().map(|a| a.current_task_count as f64).collect();
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        let stddev = variance.sqrt();

        let threshold = self.config.steal_threshold.max(stddev);

        let mut overloaded: Vec<&AgentProfile> = agents
            .iter()
            .filter(|a| a.current_task_count as f64 > mean + threshold)
            .collect();
        overloaded.sort_by(|a, b| b.current_task_count.cmp(&a.current_task_count));

        let mut underloaded: Vec<&AgentProfile> = agents
            .iter()
            .filter(|a| (a.current_task_count as f64) < mean - threshold && a.has_capacity())
            .collect();
        underloaded.sort_by_key(|a| a.current_task_count);

        {
            let mut stats = self.stats.write().await;
            stats.total_agents = agents.len();
            stats.overloaded_agents = overloaded.len();
            stats.underloaded_agents = underloaded.len();
            stats.avg_tasks_per_agent = mean;
        }

        let mut ops = Vec::new();
        for source in overloaded {
            let Some(mut movable) = tasks_by_agent.get(&source.id).cloned() else {
                continue;
            };
            movable.sort_by_key(|t| t.priority);

            for task in movable.into_iter().take(self.config.max_steal_batch) {
                let target = underloaded.iter().find(|a| {
                    a.id != source.id
                        && (task.required_capabilities.is_empty()
                            || !task
                                .required_capabilities
                                .is_disjoint(&a.capabilities))
                });
                if let Some(target) = target {
                    ops.push(StealOperation {
                        task_id: task.id.clone(),
                        from_agent: source.id.clone(),
                        to_agent: target.id.clone(),
                    });
                }
            }
        }

        if !ops.is_empty() {
            info!(count = ops.len(), "work-stealing rebalance planned");
        } else {
            debug!("work-stealing tick found no imbalance to correct");
        }

        ops
    }

    pub async fn record_steal(&self, op: StealOperation) {
        let mut stats = self.stats.write().await;
        stats.successful_steals += 1;
        let mut recent = self.recent_steals.write().await;
        recent.push(op.clone());
        if recent.len() > 50 {
            recent.remove(0);
        }
        stats.recent_steals = recent.clone();
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }
}

impl Default for WorkStealingScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
