use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with an upper bound and optional jitter, used to
/// space out retry attempts after a task fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before the `attempt`-th retry (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let bounded = scaled.min(self.max.as_secs_f64());
        let jittered = if self.jitter {
            use rand::Rng;
            bounded * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            bounded
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}
