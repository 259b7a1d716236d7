use crate::error::{OrchestratorError, Result};
use crate::models::{Task, TaskId};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// One node per known task id, tracking the edges the scheduler needs
/// to answer "is this ready?" without touching the task's own record.
#[derive(Debug, Clone, Default)]
struct Node {
    dependencies: HashSet<TaskId>,
    dependents: HashSet<TaskId>,
    completed: bool,
    priority: u8,
    timeout_ms: u64,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Tracks task-to-task prerequisites, answers readiness queries, and
/// detects cycles before they can be committed.
///
/// Owned exclusively by the task engine; never mutated from outside it.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: RwLock<HashMap<TaskId, Node>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `task`, validating that every dependency already
    /// exists and that the new edges do not introduce a cycle. On
    /// rejection the graph is left unchanged.
    pub async fn add(&self, task: &Task) -> Result<()> {
        let mut nodes = self.nodes.write().await;

        for dep in &task.dependencies {
            if !nodes.contains_key(dep) {
                return Err(OrchestratorError::invalid(format!(
                    "unknown dependency {dep} for task {}",
                    task.id
                )));
            }
        }

        if Self::would_cycle(&nodes, &task.id, &task.dependencies) {
            return Err(OrchestratorError::invalid(format!(
                "task {} would introduce a dependency cycle",
                task.id
            )));
        }

        for dep in &task.dependencies {
            nodes
                .entry(dep.clone())
                .or_default()
                .dependents
                .insert(task.id.clone());
        }

        nodes.insert(
            task.id.clone(),
            Node {
                dependencies: task.dependencies.iter().cloned().collect(),
                dependents: nodes.get(&task.id).map(|n| n.dependents.clone()).unwrap_or_default(),
                completed: false,
                priority: task.priority,
                timeout_ms: task.timeout_ms,
                created_at: task.created_at,
            },
        );

        Ok(())
    }

    fn would_cycle(
        nodes: &HashMap<TaskId, Node>,
        new_id: &TaskId,
        new_deps: &[TaskId],
    ) -> bool {
        // Walk backward from each proposed dependency; if we reach
        // `new_id` there is a cycle.
        let mut stack: Vec<TaskId> = new_deps.to_vec();
        let mut visited: HashSet<TaskId> = HashSet::new();
        while let Some(current) = stack.pop() {
            if &current == new_id {
                return true;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = nodes.get(&current) {
                stack.extend(node.dependencies.iter().cloned());
            }
        }
        false
    }

    /// Direct dependents of `id`, regardless of their readiness.
    pub async fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.nodes
            .read()
            .await
            .get(id)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_ready(&self, id: &TaskId) -> bool {
        let nodes = self.nodes.read().await;
        match nodes.get(id) {
            Some(node) => node
                .dependencies
                .iter()
                .all(|dep| nodes.get(dep).is_some_and(|d| d.completed)),
            None => true,
        }
    }

    /// Marks `id` completed and returns dependents that just became
    /// ready, ordered by (priority desc, created-at asc, id asc).
    pub async fn mark_completed(&self, id: &TaskId) -> Vec<TaskId> {
        let mut nodes = self.nodes.write().await;
        let dependents = match nodes.get_mut(id) {
            Some(node) => {
                node.completed = true;
                node.dependents.clone()
            }
            None => return Vec::new(),
        };

        let mut ready: Vec<(TaskId, u8, chrono::DateTime<chrono::Utc>)> = Vec::new();
        for dep_id in dependents {
            let is_ready = nodes
                .get(&dep_id)
                .map(|n| n.dependencies.iter().all(|d| nodes.get(d).is_some_and(|x| x.completed)))
                .unwrap_or(false);
            if is_ready {
                if let Some(n) = nodes.get(&dep_id) {
                    ready.push((dep_id, n.priority, n.created_at));
                }
            }
        }

        ready.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then(a.2.cmp(&b.2))
                .then(a.0.cmp(&b.0))
        });
        ready.into_iter().map(|(id, _, _)| id).collect()
    }

    /// Deterministic total order over known, non-completed tasks.
    pub async fn topological_sort(&self) -> Result<Vec<TaskId>> {
        let nodes = self.nodes.read().await;
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        for (id, node) in nodes.iter() {
            in_degree.insert(id.clone(), node.dependencies.len());
        }

        let mut ready: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.make_contiguous().sort();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id.clone());
            if let Some(node) = nodes.get(&id) {
                let mut newly_ready = Vec::new();
                for dependent in &node.dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(dependent.clone());
                        }
                    }
                }
                newly_ready.sort();
                for id in newly_ready {
                    ready.push_back(id);
                }
            }
        }

        if order.len() != nodes.len() {
            let cycles = Self::detect_cycles_locked(&nodes);
            return Err(OrchestratorError::conflict(format!(
                "graph contains cycles: {cycles:?}"
            )));
        }
        Ok(order)
    }

    pub async fn detect_cycles(&self) -> Vec<Vec<TaskId>> {
        let nodes = self.nodes.read().await;
        Self::detect_cycles_locked(&nodes)
    }

    fn detect_cycles_locked(nodes: &HashMap<TaskId, Node>) -> Vec<Vec<TaskId>> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut cycles = Vec::new();

        for start in nodes.keys() {
            if visited.contains(start) {
                continue;
            }
            let mut path = Vec::new();
            let mut on_path: HashSet<TaskId> = HashSet::new();
            let mut stack = vec![(start.clone(), false)];

            while let Some((id, leaving)) = stack.pop() {
                if leaving {
                    on_path.remove(&id);
                    path.pop();
                    continue;
                }
                if on_path.contains(&id) {
                    let cycle_start = path.iter().position(|p| p == &id).unwrap_or(0);
                    cycles.push(path[cycle_start..].to_vec());
                    continue;
                }
                if visited.contains(&id) {
                    continue;
                }
                visited.insert(id.clone());
                on_path.insert(id.clone());
                path.push(id.clone());
                stack.push((id.clone(), true));
                if let Some(node) = nodes.get(&id) {
                    for dep in &node.dependencies {
                        stack.push((dep.clone(), false));
                    }
                }
            }
        }
        cycles
    }

    /// Longest path through the DAG by cumulative task timeout, i.e. the
    /// minimum wall-clock time the graph can finish in given unlimited
    /// parallelism. Returns the path of task ids and its total weight.
    pub async fn critical_path(&self) -> (Vec<TaskId>, u64) {
        let nodes = self.nodes.read().await;
        let order = match Self::topological_order_locked(&nodes) {
            Some(order) => order,
            None => return (Vec::new(), 0),
        };

        let mut best: HashMap<TaskId, (u64, Option<TaskId>)> = HashMap::new();
        for id in &order {
            let node = &nodes[id];
            let from_deps = node
                .dependencies
                .iter()
                .filter_map(|dep| best.get(dep).map(|(w, _)| (*w, dep.clone())))
                .max_by_key(|(w, _)| *w);
            let (weight, pred) = match from_deps {
                Some((w, dep)) => (w + node.timeout_ms, Some(dep)),
                None => (node.timeout_ms, None),
            };
            best.insert(id.clone(), (weight, pred));
        }

        let Some((end, (total, _))) = best.iter().max_by_key(|(_, (w, _))| *w).map(|(id, v)| (id.clone(), v.clone())) else {
            return (Vec::new(), 0);
        };

        let mut path = vec![end.clone()];
        let mut current = end;
        while let Some((_, Some(pred))) = best.get(&current) {
            path.push(pred.clone());
            current = pred.clone();
        }
        path.reverse();
        (path, total)
    }

    /// Topological order via Kahn's algorithm, ignoring completion state.
    /// Returns `None` if the graph contains a cycle.
    fn topological_order_locked(nodes: &HashMap<TaskId, Node>) -> Option<Vec<TaskId>> {
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        for (id, node) in nodes.iter() {
            in_degree.insert(id.clone(), node.dependencies.len());
        }

        let mut ready: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.make_contiguous().sort();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id.clone());
            if let Some(node) = nodes.get(&id) {
                let mut newly_ready = Vec::new();
                for dependent in &node.dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            newly_ready.push(dependent.clone());
                        }
                    }
                }
                newly_ready.sort();
                for id in newly_ready {
                    ready.push_back(id);
                }
            }
        }

        if order.len() != nodes.len() {
            None
        } else {
            Some(order)
        }
    }

    pub async fn to_dot(&self) -> String {
        let nodes = self.nodes.read().await;
        let mut out = String::from("digraph dependencies {\n");
        for (id, node) in nodes.iter() {
            for dep in &node.dependencies {
                out.push_str(&format!("  \"{dep}\" -> \"{id}\";\n"));
            }
        }
        out.push_str("}\n");
        out
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        let mut t = Task::new("build", id, 5);
        t.id = id.to_string();
        t.dependencies = deps.iter().map(|s| s.to_string()).collect();
        t
    }

    #[tokio::test]
    async fn linear_chain_becomes_ready_in_order() {
        let graph = DependencyGraph::new();
        graph.add(&task("t1", &[])).await.unwrap();
        graph.add(&task("t2", &["t1"])).await.unwrap();
        graph.add(&task("t3", &["t2"])).await.unwrap();

        assert!(graph.is_ready(&"t1".to_string()).await);
        assert!(!graph.is_ready(&"t2".to_string()).await);

        let ready = graph.mark_completed(&"t1".to_string()).await;
        assert_eq!(ready, vec!["t2".to_string()]);
        assert!(graph.is_ready(&"t2".to_string()).await);

        let ready = graph.mark_completed(&"t2".to_string()).await;
        assert_eq!(ready, vec!["t3".to_string()]);
    }

    #[tokio::test]
    async fn rejects_missing_dependency() {
        let graph = DependencyGraph::new();
        let err = graph.add(&task("t1", &["ghost"])).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rejects_cycles_and_leaves_graph_unchanged() {
        let graph = DependencyGraph::new();
        graph.add(&task("t1", &[])).await.unwrap();
        graph.add(&task("t2", &["t1"])).await.unwrap();

        // t1 now depending on t2 would close a cycle t1 -> t2 -> t1.
        let cyclic = task("t1_b", &["t2"]);
        let mut cyclic = cyclic;
        cyclic.id = "t1".to_string();
        let err = graph.add(&cyclic).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
        assert_eq!(graph.len().await, 2);
    }

    #[tokio::test]
    async fn topological_sort_breaks_ties_by_id() {
        let graph = DependencyGraph::new();
        graph.add(&task("b", &[])).await.unwrap();
        graph.add(&task("a", &[])).await.unwrap();
        let order = graph.topological_sort().await.unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn ready_dependents_ordered_by_priority_then_created_then_id() {
        let graph = DependencyGraph::new();
        graph.add(&task("root", &[])).await.unwrap();

        let mut low = task("low", &["root"]);
        low.priority = 1;
        let mut high = task("high", &["root"]);
        high.priority = 9;
        graph.add(&low).await.unwrap();
        graph.add(&high).await.unwrap();

        let ready = graph.mark_completed(&"root".to_string()).await;
        assert_eq!(ready, vec!["high".to_string(), "low".to_string()]);
    }

    #[tokio::test]
    async fn critical_path_follows_the_longest_weighted_chain() {
        let graph = DependencyGraph::new();

        let mut root = task("root", &[]);
        root.timeout_ms = 1_000;
        graph.add(&root).await.unwrap();

        let mut short = task("short", &["root"]);
        short.timeout_ms = 500;
        graph.add(&short).await.unwrap();

        let mut long_a = task("long_a", &["root"]);
        long_a.timeout_ms = 5_000;
        graph.add(&long_a).await.unwrap();

        let mut long_b = task("long_b", &["long_a"]);
        long_b.timeout_ms = 2_000;
        graph.add(&long_b).await.unwrap();

        let (path, total) = graph.critical_path().await;
        assert_eq!(path, vec!["root".to_string(), "long_a".to_string(), "long_b".to_string()]);
        assert_eq!(total, 8_000);
    }
}
