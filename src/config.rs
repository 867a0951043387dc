//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Engine configuration.
///
/// Values only — how they are sourced (env, file, flags) is the binary's
/// concern. `from_env` reads the `JOBFLOW_*` variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Dispatch queue label, used in logs and metrics.
    pub queue_name: String,
    /// Admission gate size: maximum concurrent executor invocations.
    pub max_concurrent_jobs: usize,
    /// Number of worker loops popping from the queue. Independent of
    /// `max_concurrent_jobs` — pop concurrency and execute concurrency are
    /// decoupled by the admission gate.
    pub worker_loops: usize,
    /// Bounded wait for each queue pop; the shutdown flag is re-checked
    /// after every wait that expires.
    pub pop_wait: Duration,
    /// How often the timeout monitor sweeps RUNNING jobs.
    pub monitor_interval: Duration,
    /// RUNNING jobs older than this are considered orphaned by a dead
    /// process and re-queued by recovery.
    pub stale_threshold: Duration,
    /// Idempotency record lifetime.
    pub idempotency_ttl: Duration,
    /// Default max retries for submissions that do not specify one.
    pub default_max_retries: u32,
    /// Default per-episode timeout for submissions that do not specify one.
    pub default_timeout_seconds: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_name: "job_queue".to_string(),
            max_concurrent_jobs: 2,
            worker_loops: 2,
            pop_wait: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(10),
            stale_threshold: Duration::from_secs(300), // 5 minutes
            idempotency_ttl: Duration::from_secs(300),
            default_max_retries: 3,
            default_timeout_seconds: 120,
        }
    }
}

impl EngineConfig {
    /// Build a config from `JOBFLOW_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("JOBFLOW_QUEUE_NAME") {
            if !name.is_empty() {
                config.queue_name = name;
            }
        }
        config.max_concurrent_jobs =
            parse_env("JOBFLOW_MAX_CONCURRENT_JOBS", config.max_concurrent_jobs)?;
        config.worker_loops = parse_env("JOBFLOW_WORKER_LOOPS", config.worker_loops)?;
        config.pop_wait = Duration::from_secs(parse_env(
            "JOBFLOW_POP_WAIT_SECS",
            config.pop_wait.as_secs(),
        )?);
        config.monitor_interval = Duration::from_secs(parse_env(
            "JOBFLOW_MONITOR_INTERVAL_SECS",
            config.monitor_interval.as_secs(),
        )?);
        config.stale_threshold = Duration::from_secs(parse_env(
            "JOBFLOW_STALE_THRESHOLD_SECS",
            config.stale_threshold.as_secs(),
        )?);
        config.idempotency_ttl = Duration::from_secs(parse_env(
            "JOBFLOW_IDEMPOTENCY_TTL_SECS",
            config.idempotency_ttl.as_secs(),
        )?);
        config.default_max_retries =
            parse_env("JOBFLOW_DEFAULT_MAX_RETRIES", config.default_max_retries)?;
        config.default_timeout_seconds = parse_env(
            "JOBFLOW_DEFAULT_TIMEOUT_SECS",
            config.default_timeout_seconds,
        )?;

        if config.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JOBFLOW_MAX_CONCURRENT_JOBS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.worker_loops == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JOBFLOW_WORKER_LOOPS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.default_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JOBFLOW_DEFAULT_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.pop_wait, Duration::from_secs(5));
        assert_eq!(config.monitor_interval, Duration::from_secs(10));
        assert_eq!(config.stale_threshold, Duration::from_secs(300));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(300));
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_timeout_seconds, 120);
    }
}
