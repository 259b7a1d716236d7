use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShareLevel {
    Private,
    Team,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Knowledge,
    Result,
    State,
    Communication,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub original_entry: String,
    pub original_agent: String,
    pub shared_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub agent: String,
    pub entry_type: EntryType,
    pub content: String,
    pub task_id: Option<String>,
    pub objective_id: Option<String>,
    pub tags: HashSet<String>,
    pub metadata: HashMap<String, String>,
    pub share_level: ShareLevel,
    pub provenance: Option<Provenance>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub agent: Option<String>,
    pub entry_type: Option<EntryType>,
    pub task_id: Option<String>,
    pub objective_id: Option<String>,
    pub tags: Vec<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub before: Option<chrono::DateTime<chrono::Utc>>,
    pub share_level: Option<ShareLevel>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub domain: String,
    pub expertise: HashSet<String>,
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastOutcome {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub max_entries: usize,
    pub knowledge_search_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            knowledge_search_limit: 50,
        }
    }
}

/// Per-agent memory and cross-agent knowledge bases. Owned exclusively
/// by the memory worker; `remember`/`recall`/`share`/`broadcast` are
/// its entire external surface.
pub struct MemoryStore {
    config: MemoryConfig,
    entries: RwLock<HashMap<String, MemoryEntry>>,
    by_agent: RwLock<HashMap<String, Vec<String>>>,
    insertion_order: RwLock<Vec<String>>,
    knowledge_bases: RwLock<HashMap<String, KnowledgeBase>>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            by_agent: RwLock::new(HashMap::new()),
            insertion_order: RwLock::new(Vec::new()),
            knowledge_bases: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_knowledge_base(&self, kb: KnowledgeBase) {
        self.knowledge_bases.write().await.insert(kb.domain.clone(), kb);
    }

    /// Stores a new entry, cross-indexing it into matching knowledge
    /// bases, and evicts the oldest entries across all agents if the
    /// store exceeds `max_entries`.
    pub async fn remember(
        &self,
        agent: impl Into<String>,
        entry_type: EntryType,
        content: impl Into<String>,
        tags: HashSet<String>,
        metadata: HashMap<String, String>,
        share_level: ShareLevel,
    ) -> Result<MemoryEntry> {
        let agent = agent.into();
        let entry = MemoryEntry {
            id: format!("mem-{}", uuid::Uuid::new_v4()),
            agent: agent.clone(),
            entry_type,
            content: content.into(),
            task_id: None,
            objective_id: None,
            tags,
            metadata,
            share_level,
            provenance: None,
            created_at: chrono::Utc::now(),
        };

        self.insert_entry(entry.clone()).await;

        if entry.entry_type == EntryType::Knowledge {
            self.cross_index(&entry).await;
        }

        self.evict_if_needed().await;
        Ok(entry)
    }

    async fn insert_entry(&self, entry: MemoryEntry) {
        let id = entry.id.clone();
        let agent = entry.agent.clone();
        self.entries.write().await.insert(id.clone(), entry);
        self.by_agent.write().await.entry(agent).or_default().push(id.clone());
        self.insertion_order.write().await.push(id);
    }

    async fn cross_index(&self, entry: &MemoryEntry) {
        let mut kbs = self.knowledge_bases.write().await;
        for kb in kbs.values_mut() {
            if kb.expertise.intersection(&entry.tags).next().is_some() {
                kb.entries.push(entry.id.clone());
            }
        }
    }

    async fn evict_if_needed(&self) {
        let over = {
            let entries = self.entries.read().await;
            entries.len().saturating_sub(self.config.max_entries)
        };
        if over == 0 {
            return;
        }

        let mut order = self.insertion_order.write().await;
        let to_evict: Vec<String> = order.drain(..over).collect();
        drop(order);

        let mut entries = self.entries.write().await;
        let mut by_agent = self.by_agent.write().await;
        for id in to_evict {
            if let Some(entry) = entries.remove(&id) {
                if let Some(list) = by_agent.get_mut(&entry.agent) {
                    list.retain(|e| e != &id);
                }
            }
        }
    }

    /// Filters entries by `query`, sorted newest-first, with `limit`
    /// applied last. A private entry is only visible to `requesting_agent`,
    /// regardless of what `query` otherwise matches.
    pub async fn recall(&self, requesting_agent: &str, query: &RecallQuery) -> Vec<MemoryEntry> {
        let entries = self.entries.read().await;
        let mut matched: Vec<MemoryEntry> = entries
            .values()
            .filter(|e| e.share_level != ShareLevel::Private || e.agent == requesting_agent)
            .filter(|e| query.agent.as_ref().map_or(true, |a| &e.agent == a))
            .filter(|e| query.entry_type.as_ref().map_or(true, |t| &e.entry_type == t))
            .filter(|e| query.task_id.as_ref().map_or(true, |t| e.task_id.as_ref() == Some(t)))
            .filter(|e| query.objective_id.as_ref().map_or(true, |o| e.objective_id.as_ref() == Some(o)))
            .filter(|e| query.tags.is_empty() || query.tags.iter().any(|t| e.tags.contains(t)))
            .filter(|e| query.since.map_or(true, |s| e.created_at >= s))
            .filter(|e| query.before.map_or(true, |b| e.created_at <= b))
            .filter(|e| query.share_level.as_ref().map_or(true, |s| &e.share_level == s))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Duplicates the entry identified by `entry_id` under `target_agent`
    /// with provenance pointing at the original. Private entries may
    /// not be shared.
    pub async fn share(&self, entry_id: &str, target_agent: impl Into<String>) -> Result<MemoryEntry> {
        let target_agent = target_agent.into();
        let original = {
            let entries = self.entries.read().await;
            entries
                .get(entry_id)
                .cloned()
                .ok_or_else(|| OrchestratorError::not_found(format!("memory entry {entry_id}")))?
        };

        if original.share_level == ShareLevel::Private {
            return Err(OrchestratorError::invalid("cannot share a private entry"));
        }

        let shared = MemoryEntry {
            id: format!("mem-{}", uuid::Uuid::new_v4()),
            agent: target_agent,
            entry_type: original.entry_type.clone(),
            content: original.content.clone(),
            task_id: original.task_id.clone(),
            objective_id: original.objective_id.clone(),
            tags: original.tags.clone(),
            metadata: original.metadata.clone(),
            share_level: original.share_level,
            provenance: Some(Provenance {
                original_entry: original.id.clone(),
                original_agent: original.agent.clone(),
                shared_at: chrono::Utc::now(),
            }),
            created_at: chrono::Utc::now(),
        };

        self.insert_entry(shared.clone()).await;
        self.evict_if_needed().await;
        Ok(shared)
    }

    /// Shares `entry_id` to every id in `targets`. Per-target failures
    /// are logged but do not stop the broadcast.
    pub async fn broadcast(&self, entry_id: &str, targets: &[String]) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        for target in targets {
            match self.share(entry_id, target.clone()).await {
                Ok(_) => outcome.delivered.push(target.clone()),
                Err(e) => {
                    warn!(target = %target, error = %e, "broadcast share failed");
                    outcome.failed.push((target.clone(), e.to_string()));
                }
            }
        }
        outcome
    }

    /// Substring search over knowledge-base entries, optionally scoped
    /// to `domain`/`expertise`, capped at `knowledge_search_limit`.
    pub async fn search_knowledge(
        &self,
        query: &str,
        domain: Option<&str>,
        expertise: Option<&str>,
    ) -> Vec<MemoryEntry> {
        let kbs = self.knowledge_bases.read().await;
        let mut candidate_ids: HashSet<String> = HashSet::new();
        for kb in kbs.values() {
            if domain.is_some_and(|d| d != kb.domain) {
                continue;
            }
            if expertise.is_some_and(|e| !kb.expertise.contains(e)) {
                continue;
            }
            candidate_ids.extend(kb.entries.iter().cloned());
        }
        drop(kbs);

        let entries = self.entries.read().await;
        let mut results: Vec<MemoryEntry> = candidate_ids
            .into_iter()
            .filter_map(|id| entries.get(&id).cloned())
            .filter(|e| e.content.to_lowercase().contains(&query.to_lowercase()))
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(self.config.knowledge_search_limit);
        results
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn get(&self, entry_id: &str) -> Option<MemoryEntry> {
        self.entries.read().await.get(entry_id).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
