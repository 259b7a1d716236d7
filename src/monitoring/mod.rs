use crate::circuit::CircuitBreakerMetrics;
use crate::engine::EngineStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: u64,
    pub uptime_seconds: f64,
    pub health_status: HealthStatus,
    pub circuit_breakers: Vec<CircuitBreakerMetrics>,
    pub engine: EngineStats,
    pub bus_queue_depths: Vec<(String, usize)>,
    pub bus_dead_letter_counts: Vec<(String, usize)>,
    pub memory_entries: usize,
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub collection_interval: Duration,
    pub metrics_retention_count: usize,
    pub queue_backlog_warning: usize,
    pub queue_backlog_critical: usize,
    pub open_circuit_critical_fraction: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(30),
            metrics_retention_count: 200,
            queue_backlog_warning: 500,
            queue_backlog_critical: 950,
            open_circuit_critical_fraction: 0.5,
        }
    }
}

/// A snapshot source the monitor samples on each collection tick.
/// Implemented by the orchestrator; kept as a trait so the monitor has
/// no compile-time dependency on engine/bus/memory internals.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    async fn circuit_breakers(&self) -> Vec<CircuitBreakerMetrics>;
    async fn engine_stats(&self) -> EngineStats;
    async fn bus_queue_depths(&self) -> Vec<(String, usize)>;
    async fn bus_dead_letter_counts(&self) -> Vec<(String, usize)>;
    async fn memory_entry_count(&self) -> usize;
}

fn derive_health(config: &MonitoringConfig, metrics: &SystemMetrics) -> HealthStatus {
    let total_circuits = metrics.circuit_breakers.len().max(1);
    let open_circuits = metrics
        .circuit_breakers
        .iter()
        .filter(|c| matches!(c.state, crate::circuit::CircuitState::Open))
        .count();
    let open_fraction = open_circuits as f64 / total_circuits as f64;

    let max_backlog = metrics
        .bus_queue_depths
        .iter()
        .map(|(_, depth)| *depth)
        .max()
        .unwrap_or(0);

    if open_fraction >= config.open_circuit_critical_fraction || max_backlog >= config.queue_backlog_critical {
        HealthStatus::Critical
    } else if open_circuits > 0 || max_backlog >= config.queue_backlog_warning {
        HealthStatus::Degraded
    } else if metrics.engine.failed > metrics.engine.completed.max(1) {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Healthy
    }
}

/// Periodically samples engine, bus, and memory state into a bounded
/// history, deriving an overall [`HealthStatus`] from configurable
/// thresholds.
pub struct SystemMonitor {
    config: MonitoringConfig,
    start_time: Instant,
    history: Arc<RwLock<Vec<SystemMetrics>>>,
    current: Arc<RwLock<Option<SystemMetrics>>>,
    sample_count: AtomicU64,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SystemMonitor {
    pub fn new(config: MonitoringConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            history: Arc::new(RwLock::new(Vec::new())),
            current: Arc::new(RwLock::new(None)),
            sample_count: AtomicU64::new(0),
            task_handle: Mutex::new(None),
        }
    }

    async fn sample(&self, source: &dyn MetricsSource) -> SystemMetrics {
        let circuit_breakers = source.circuit_breakers().await;
        let engine = source.engine_stats().await;
        let bus_queue_depths = source.bus_queue_depths().await;
        let bus_dead_letter_counts = source.bus_dead_letter_counts().await;
        let memory_entries = source.memory_entry_count().await;

        let mut metrics = SystemMetrics {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uptime_seconds: self.start_time.elapsed().as_secs_f64(),
            health_status: HealthStatus::Healthy,
            circuit_breakers,
            engine,
            bus_queue_depths,
            bus_dead_letter_counts,
            memory_entries,
        };
        metrics.health_status = derive_health(&self.config, &metrics);
        metrics
    }

    async fn record(&self, metrics: SystemMetrics) {
        match metrics.health_status {
            HealthStatus::Critical => warn!(status = ?metrics.health_status, "system health critical"),
            HealthStatus::Unhealthy | HealthStatus::Degraded => {
                debug!(status = ?metrics.health_status, "system health degraded")
            }
            HealthStatus::Healthy => {}
        }

        *self.current.write().await = Some(metrics.clone());
        let mut history = self.history.write().await;
        history.push(metrics);
        if history.len() > self.config.metrics_retention_count {
            let overflow = history.len() - self.config.metrics_retention_count;
            history.drain(0..overflow);
        }
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn current(&self) -> Option<SystemMetrics> {
        self.current.read().await.clone()
    }

    pub async fn history(&self) -> Vec<SystemMetrics> {
        self.history.read().await.clone()
    }

    /// Spawns the background collection loop. The returned handle is
    /// also retained so [`SystemMonitor::shutdown`] can abort it.
    pub async fn start(self: &Arc<Self>, source: Arc<dyn MetricsSource>) {
        let monitor = self.clone();
        let interval = self.config.collection_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let metrics = monitor.sample(source.as_ref()).await;
                monitor.record(metrics).await;
            }
        });
        *self.task_handle.lock().await = Some(handle);
        info!("system monitor started");
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.abort();
        }
        info!("system monitor stopped");
    }
}
