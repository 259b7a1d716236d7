use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_concurrency_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_timeout: Duration::from_secs(60),
            half_open_concurrency_limit: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_failures: u64,
}

/// A single named circuit: CLOSED admits calls, OPEN rejects them until
/// its timeout expires, HALF_OPEN admits a bounded number of probes to
/// decide whether to return to CLOSED or back to OPEN.
struct Breaker {
    state: RwLock<CircuitState>,
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    half_open_inflight: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
}

impl Breaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            config,
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            half_open_inflight: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    async fn admit(&self, name: &str) -> Result<()> {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .read()
                    .await
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if !elapsed {
                    return Err(OrchestratorError::CircuitOpen {
                        name: name.to_string(),
                    });
                }
                self.transition_to_half_open(name).await;
                self.admit_half_open(name)
            }
            CircuitState::HalfOpen => self.admit_half_open(name),
        }
    }

    fn admit_half_open(&self, name: &str) -> Result<()> {
        let inflight = self.half_open_inflight.fetch_add(1, Ordering::SeqCst);
        if inflight >= self.config.half_open_concurrency_limit {
            self.half_open_inflight.fetch_sub(1, Ordering::SeqCst);
            return Err(OrchestratorError::CircuitOpen {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn record_success(&self, name: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                self.half_open_inflight.fetch_sub(1, Ordering::SeqCst);
                let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.transition_to_closed(name).await;
                }
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self, name: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open(name).await;
                }
            }
            CircuitState::HalfOpen => {
                self.half_open_inflight.fetch_sub(1, Ordering::SeqCst);
                self.transition_to_open(name).await;
            }
            CircuitState::Open => {}
        }
    }

    async fn transition_to_open(&self, name: &str) {
        warn!(circuit = name, "circuit breaker opened");
        *self.state.write().await = CircuitState::Open;
        *self.opened_at.write().await = Some(Instant::now());
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.half_open_inflight.store(0, Ordering::SeqCst);
    }

    async fn transition_to_half_open(&self, name: &str) {
        debug!(circuit = name, "circuit breaker probing (half-open)");
        *self.state.write().await = CircuitState::HalfOpen;
        self.consecutive_successes.store(0, Ordering::SeqCst);
    }

    async fn transition_to_closed(&self, name: &str) {
        debug!(circuit = name, "circuit breaker closed");
        *self.state.write().await = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
    }

    async fn metrics(&self, name: &str) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: name.to_string(),
            state: *self.state.read().await,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }

    async fn reset(&self) {
        *self.state.write().await = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        self.half_open_inflight.store(0, Ordering::SeqCst);
        *self.opened_at.write().await = None;
    }
}

/// A registry of independent, named circuit breakers. Callers wrap any
/// fallible call to a flaky collaborator with [`CircuitBreakerSet::execute`];
/// the probe/admission bookkeeping never leaks out.
pub struct CircuitBreakerSet {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
}

impl CircuitBreakerSet {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    async fn breaker_for(&self, name: &str) -> Arc<Breaker> {
        if let Some(b) = self.breakers.read().await.get(name) {
            return b.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(self.config.clone())))
            .clone()
    }

    /// Runs `thunk` if the named circuit admits a call, recording the
    /// outcome. Returns `CircuitOpen` without invoking `thunk` when the
    /// circuit is open or the half-open probe slot is full.
    pub async fn execute<F, Fut, T, E>(&self, name: &str, thunk: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let breaker = self.breaker_for(name).await;
        breaker.admit(name).await?;

        match thunk().await {
            Ok(value) => {
                breaker.record_success(name).await;
                Ok(value)
            }
            Err(e) => {
                breaker.record_failure(name).await;
                Err(OrchestratorError::DeliveryFailure(e.to_string()))
            }
        }
    }

    /// Checks whether the named circuit currently admits a call, without
    /// recording any outcome. For callers that need to gate an
    /// assignment now and report its outcome later via
    /// [`CircuitBreakerSet::record_success`]/[`CircuitBreakerSet::record_failure`].
    pub async fn admit(&self, name: &str) -> Result<()> {
        self.breaker_for(name).await.admit(name).await
    }

    /// Reports a successful outcome directly, without the admission
    /// check `execute` performs. For callers that already know a call
    /// was admitted and now need to report how it went.
    pub async fn record_success(&self, name: &str) {
        self.breaker_for(name).await.record_success(name).await;
    }

    /// Reports a failed outcome directly, without the admission check
    /// `execute` performs.
    pub async fn record_failure(&self, name: &str) {
        self.breaker_for(name).await.record_failure(name).await;
    }

    pub async fn state(&self, name: &str) -> CircuitState {
        *self.breaker_for(name).await.state.read().await
    }

    pub async fn metrics(&self, name: &str) -> CircuitBreakerMetrics {
        self.breaker_for(name).await.metrics(name).await
    }

    pub async fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers = self.breakers.read().await;
        let mut out = Vec::with_capacity(breakers.len());
        for (name, breaker) in breakers.iter() {
            out.push(breaker.metrics(name).await);
        }
        out
    }

    pub async fn reset(&self, name: &str) {
        self.breaker_for(name).await.reset().await;
    }

    pub async fn reset_all(&self) {
        let breakers = self.breakers.read().await;
        for breaker in breakers.values() {
            breaker.reset().await;
        }
    }
}

impl Default for CircuitBreakerSet {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let set = CircuitBreakerSet::new(config);

        for _ in 0..2 {
            let res: Result<()> = set
                .execute("svc", || async { Err::<(), _>("boom") })
                .await;
            assert!(res.is_err());
        }

        assert_eq!(set.state("svc").await, CircuitState::Open);
        let res: Result<()> = set.execute("svc", || async { Ok(()) }).await;
        assert!(matches!(res, Err(OrchestratorError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn half_open_then_closed_on_success_streak() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            open_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let set = CircuitBreakerSet::new(config);

        let _: Result<()> = set.execute("svc", || async { Err::<(), _>("boom") }).await;
        assert_eq!(set.state("svc").await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let _: Result<()> = set.execute("svc", || async { Ok(()) }).await;
        assert_eq!(set.state("svc").await, CircuitState::HalfOpen);

        let _: Result<()> = set.execute("svc", || async { Ok(()) }).await;
        assert_eq!(set.state("svc").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failure_in_half_open_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let set = CircuitBreakerSet::new(config);

        let _: Result<()> = set.execute("svc", || async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _: Result<()> = set.execute("svc", || async { Err::<(), _>("boom again") }).await;
        assert_eq!(set.state("svc").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn breakers_are_independent_per_name() {
        let set = CircuitBreakerSet::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let _: Result<()> = set.execute("a", || async { Err::<(), _>("boom") }).await;
        assert_eq!(set.state("a").await, CircuitState::Open);
        assert_eq!(set.state("b").await, CircuitState::Closed);
    }
}
