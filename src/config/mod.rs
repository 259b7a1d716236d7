use crate::circuit::CircuitBreakerConfig;
use crate::engine::EngineConfig;
use crate::error::OrchestratorError;
use crate::memory::MemoryConfig;
use crate::scheduler::SchedulerConfig;
use crate::{bus::BusConfig, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub circuit: CircuitBreakerConfig,
    pub scheduler: SchedulerConfig,
    pub bus: BusConfig,
    pub memory: MemoryConfig,
    pub api: ApiConfig,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Loads configuration from the environment, falling back to
    /// `.env` when present. `API_KEY` is mandatory and must be at
    /// least 32 characters; every other variable has a default.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(path = ?path, "loaded .env file"),
            Err(e) => tracing::debug!(error = %e, "no .env file loaded"),
        }

        let api_key = env::var("API_KEY").map_err(|_| {
            OrchestratorError::ConfigurationError("API_KEY environment variable is required".to_string())
        })?;
        if api_key.trim().len() < 32 {
            return Err(OrchestratorError::ConfigurationError(
                "API_KEY must be at least 32 characters".to_string(),
            ));
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let engine = EngineConfig {
            max_queue_size: parse_env("MAX_QUEUE_SIZE", 1000),
            max_concurrent_tasks: parse_env("MAX_CONCURRENT_TASKS", 256),
            retention: chrono::Duration::hours(parse_env("TASK_RETENTION_HOURS", 24)),
        };

        let circuit = CircuitBreakerConfig {
            failure_threshold: parse_env("CIRCUIT_FAILURE_THRESHOLD", 5),
            success_threshold: parse_env("CIRCUIT_SUCCESS_THRESHOLD", 3),
            open_timeout: Duration::from_secs(parse_env("CIRCUIT_OPEN_TIMEOUT_SECS", 60)),
            half_open_concurrency_limit: parse_env("CIRCUIT_HALF_OPEN_LIMIT", 1),
        };

        let scheduler = SchedulerConfig {
            capability_weight: parse_env("SCHEDULER_CAPABILITY_WEIGHT", 2.0),
            load_weight: parse_env("SCHEDULER_LOAD_WEIGHT", 1.5),
            priority_weight: parse_env("SCHEDULER_PRIORITY_WEIGHT", 0.5),
            steal_threshold: parse_env("SCHEDULER_STEAL_THRESHOLD", 1.0),
            max_steal_batch: parse_env("SCHEDULER_MAX_STEAL_BATCH", 2),
        };

        let bus = BusConfig {
            max_message_size: parse_env("BUS_MAX_MESSAGE_SIZE", 1_048_576),
            default_delivery_timeout_ms: parse_env("BUS_DELIVERY_TIMEOUT_MS", 30_000),
            ack_timeout_ms: parse_env("BUS_ACK_TIMEOUT_MS", 30_000),
            retry: crate::bus::RetryConfig {
                tick_interval: Duration::from_secs(parse_env("BUS_RETRY_TICK_SECS", 5)),
                max_attempts: parse_env("BUS_RETRY_MAX_ATTEMPTS", 5),
                base_backoff: Duration::from_secs(parse_env("BUS_RETRY_BASE_BACKOFF_SECS", 1)),
                max_backoff: Duration::from_secs(parse_env("BUS_RETRY_MAX_BACKOFF_SECS", 60)),
            },
        };

        let memory = MemoryConfig {
            max_entries: parse_env("MEMORY_MAX_ENTRIES", 10_000),
            knowledge_search_limit: parse_env("MEMORY_KNOWLEDGE_SEARCH_LIMIT", 50),
        };

        let api = ApiConfig {
            host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("API_PORT", 3000),
            api_key,
            allowed_origins,
        };

        Ok(Config {
            engine,
            circuit,
            scheduler,
            bus,
            memory,
            api,
        })
    }
}

#[cfg(test)]
mod tests;
