use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub type ConflictId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    Resource,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    Priority,
    Timestamp,
    Random,
    RoundRobin,
    Voting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claimant {
    pub agent_id: String,
    pub priority: u8,
    pub claimed_at: chrono::DateTime<chrono::Utc>,
    /// Votes cast by this claimant in a `Voting` resolution, keyed by
    /// the candidate agent id it supports.
    pub vote_for: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    pub kind: ConflictKind,
    pub target_id: String,
    pub claimants: Vec<Claimant>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict_id: ConflictId,
    pub winner: String,
    pub losers: Vec<String>,
}

/// Arbitrates simultaneous claims on a resource or task assignment.
/// Owned by the task engine; invoked whenever the scheduler or engine
/// detects contention over the same target.
#[derive(Default)]
pub struct ConflictResolver {
    conflicts: RwLock<HashMap<ConflictId, Conflict>>,
    round_robin_cursor: RwLock<usize>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, kind: ConflictKind, target_id: impl Into<String>) -> ConflictId {
        let id = format!("conflict-{}", uuid::Uuid::new_v4());
        let conflict = Conflict {
            id: id.clone(),
            kind,
            target_id: target_id.into(),
            claimants: Vec::new(),
            created_at: chrono::Utc::now(),
            resolved: false,
        };
        self.conflicts.write().await.insert(id.clone(), conflict);
        id
    }

    pub async fn claim(&self, conflict_id: &str, claimant: Claimant) {
        if let Some(conflict) = self.conflicts.write().await.get_mut(conflict_id) {
            conflict.claimants.push(claimant);
        }
    }

    /// Resolves `conflict_id` with `strategy`, returning the winner and
    /// the rejected losers. Returns `None` if the conflict is unknown,
    /// already resolved, or has no claimants.
    pub async fn resolve(
        &self,
        conflict_id: &str,
        strategy: ResolutionStrategy,
    ) -> Option<Resolution> {
        let mut conflicts = self.conflicts.write().await;
        let conflict = conflicts.get_mut(conflict_id)?;
        if conflict.resolved || conflict.claimants.is_empty() {
            return None;
        }

        let winner = match strategy {
            ResolutionStrategy::Priority => {
                let mut sorted = conflict.claimants.clone();
                sorted.sort_by(|a, b| {
                    b.priority
                        .cmp(&a.priority)
                        .then(a.claimed_at.cmp(&b.claimed_at))
                });
                sorted[0].agent_id.clone()
            }
            ResolutionStrategy::Timestamp => {
                let mut sorted = conflict.claimants.clone();
                sorted.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at).then(a.agent_id.cmp(&b.agent_id)));
                sorted[0].agent_id.clone()
            }
            ResolutionStrategy::Random => {
                use rand::Rng;
                let idx = rand::thread_rng().gen_range(0..conflict.claimants.len());
                conflict.claimants[idx].agent_id.clone()
            }
            ResolutionStrategy::RoundRobin => {
                let mut cursor = self.round_robin_cursor.write().await;
                let idx = *cursor % conflict.claimants.len();
                *cursor += 1;
                conflict.claimants[idx].agent_id.clone()
            }
            ResolutionStrategy::Voting => {
                let mut tally: HashMap<String, usize> = HashMap::new();
                for c in &conflict.claimants {
                    let target = c.vote_for.clone().unwrap_or_else(|| c.agent_id.clone());
                    *tally.entry(target).or_insert(0) += 1;
                }
                tally
                    .into_iter()
                    .max_by_key(|(_, votes)| *votes)
                    .map(|(agent, _)| agent)
                    .unwrap_or_else(|| conflict.claimants[0].agent_id.clone())
            }
        };

        let losers = conflict
            .claimants
            .iter()
            .map(|c| c.agent_id.clone())
            .filter(|id| id != &winner)
            .collect();

        conflict.resolved = true;

        Some(Resolution {
            conflict_id: conflict_id.to_string(),
            winner,
            losers,
        })
    }

    /// Removes resolved conflicts older than `retention`, plus any
    /// unresolved conflicts that have aged past it regardless.
    pub async fn gc(&self, retention: chrono::Duration) {
        let cutoff = chrono::Utc::now() - retention;
        self.conflicts
            .write()
            .await
            .retain(|_, c| c.created_at > cutoff);
    }

    pub async fn get(&self, conflict_id: &str) -> Option<Conflict> {
        self.conflicts.read().await.get(conflict_id).cloned()
    }

    pub async fn open_count(&self) -> usize {
        self.conflicts
            .read()
            .await
            .values()
            .filter(|c| !c.resolved)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimant(id: &str, priority: u8) -> Claimant {
        Claimant {
            agent_id: id.to_string(),
            priority,
            claimed_at: chrono::Utc::now(),
            vote_for: None,
        }
    }

    #[tokio::test]
    async fn priority_strategy_picks_highest_priority() {
        let resolver = ConflictResolver::new();
        let id = resolver.open(ConflictKind::Task, "task-1").await;
        resolver.claim(&id, claimant("a", 3)).await;
        resolver.claim(&id, claimant("b", 9)).await;

        let resolution = resolver
            .resolve(&id, ResolutionStrategy::Priority)
            .await
            .unwrap();
        assert_eq!(resolution.winner, "b");
        assert_eq!(resolution.losers, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn timestamp_strategy_picks_earliest() {
        let resolver = ConflictResolver::new();
        let id = resolver.open(ConflictKind::Resource, "res-1").await;
        let mut first = claimant("early", 1);
        first.claimed_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        resolver.claim(&id, first).await;
        resolver.claim(&id, claimant("late", 1)).await;

        let resolution = resolver
            .resolve(&id, ResolutionStrategy::Timestamp)
            .await
            .unwrap();
        assert_eq!(resolution.winner, "early");
    }

    #[tokio::test]
    async fn resolving_twice_returns_none() {
        let resolver = ConflictResolver::new();
        let id = resolver.open(ConflictKind::Task, "t").await;
        resolver.claim(&id, claimant("a", 1)).await;
        assert!(resolver
            .resolve(&id, ResolutionStrategy::Priority)
            .await
            .is_some());
        assert!(resolver
            .resolve(&id, ResolutionStrategy::Priority)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn gc_removes_aged_conflicts() {
        let resolver = ConflictResolver::new();
        resolver.open(ConflictKind::Task, "t").await;
        assert_eq!(resolver.open_count().await, 1);
        resolver.gc(chrono::Duration::seconds(-1)).await;
        assert_eq!(resolver.open_count().await, 0);
    }
}
