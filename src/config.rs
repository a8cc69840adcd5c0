//! Monitor configuration.
//!
//! Loaded from environment variables; every required key is asserted up
//! front so a misconfigured monitor fails before any connection is opened.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::backoff::RetryPolicy;

/// Environment variable naming the coordination-store endpoints
/// (comma-separated).
pub const ENV_COORDINATION_ENDPOINTS: &str = "TRAINWATCH_COORDINATION_ENDPOINTS";
const ENV_COORDINATION_PREFIX: &str = "TRAINWATCH_COORDINATION_PREFIX";
const ENV_COORDINATION_USERNAME: &str = "TRAINWATCH_COORDINATION_USERNAME";
const ENV_COORDINATION_PASSWORD: &str = "TRAINWATCH_COORDINATION_PASSWORD";
const ENV_COORDINATION_CA_CERT: &str = "TRAINWATCH_COORDINATION_CA_CERT";
const ENV_POLL_INTERVAL_SECS: &str = "TRAINWATCH_POLL_INTERVAL_SECS";
const ENV_GRACE_PERIOD_SECS: &str = "TRAINWATCH_GRACE_PERIOD_SECS";
const ENV_TEARDOWN_DELAY_SECS: &str = "TRAINWATCH_TEARDOWN_DELAY_SECS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {key}")]
    MissingKey { key: &'static str },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Connection settings for the coordination store.
#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    pub endpoints: Vec<String>,
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_cert_path: Option<PathBuf>,
}

/// Timing knobs of the monitor. Defaults are the production values; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct MonitorTuning {
    /// Cadence of the learner polling loop.
    pub poll_interval: Duration,
    /// Single grace window granted to learners after the job goes terminal.
    pub learner_grace_period: Duration,
    /// Fixed delay before every kill request, on every path.
    pub teardown_delay: Duration,
    /// Cadence of the job-started probe.
    pub startup_probe_interval: Duration,
    /// Probe attempts before a NOT_STARTED job is failed.
    pub startup_probe_attempts: u32,
    /// Insufficient-resources observations tolerated before failing the job.
    pub insufficient_resources_budget: u32,
    /// Backoff for establishing the coordination-store connection.
    pub store_connect_backoff: RetryPolicy,
    /// Backoff for seeding the default overall status.
    pub bootstrap_backoff: RetryPolicy,
    /// Backoff for trainer and lifecycle-manager calls.
    pub remote_call_backoff: RetryPolicy,
}

impl Default for MonitorTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            learner_grace_period: Duration::from_secs(60),
            teardown_delay: Duration::from_secs(10),
            startup_probe_interval: Duration::from_secs(60),
            startup_probe_attempts: 10,
            insufficient_resources_budget: 10,
            store_connect_backoff: RetryPolicy::store_interaction(
                Duration::from_secs(60),
                Duration::from_secs(30),
            ),
            bootstrap_backoff: RetryPolicy::store_interaction(
                Duration::from_secs(60),
                Duration::from_secs(10),
            ),
            remote_call_backoff: RetryPolicy::remote_call(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub coordination: CoordinationConfig,
    pub tuning: MonitorTuning,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            prefix: "trainwatch".to_string(),
            username: None,
            password: None,
            ca_cert_path: None,
        }
    }
}

impl MonitorConfig {
    /// Loads and validates configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoints = env::var(ENV_COORDINATION_ENDPOINTS)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string)
            .collect();

        let coordination = CoordinationConfig {
            endpoints,
            prefix: env::var(ENV_COORDINATION_PREFIX)
                .unwrap_or_else(|_| "trainwatch".to_string()),
            username: env::var(ENV_COORDINATION_USERNAME).ok(),
            password: env::var(ENV_COORDINATION_PASSWORD).ok(),
            ca_cert_path: env::var(ENV_COORDINATION_CA_CERT).ok().map(PathBuf::from),
        };

        let defaults = MonitorTuning::default();
        let tuning = MonitorTuning {
            poll_interval: secs_from_env(ENV_POLL_INTERVAL_SECS, defaults.poll_interval),
            learner_grace_period: secs_from_env(
                ENV_GRACE_PERIOD_SECS,
                defaults.learner_grace_period,
            ),
            teardown_delay: secs_from_env(ENV_TEARDOWN_DELAY_SECS, defaults.teardown_delay),
            ..defaults
        };

        let config = Self {
            coordination,
            tuning,
        };
        config.validate()?;
        Ok(config)
    }

    /// Asserts that every required key is present and well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordination.endpoints.is_empty() {
            return Err(ConfigError::MissingKey {
                key: ENV_COORDINATION_ENDPOINTS,
            });
        }
        if self.tuning.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: ENV_POLL_INTERVAL_SECS,
                reason: "poll interval must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_endpoints(endpoints: &[&str]) -> MonitorConfig {
        MonitorConfig {
            coordination: CoordinationConfig {
                endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
                ..CoordinationConfig::default()
            },
            tuning: MonitorTuning::default(),
        }
    }

    #[test]
    fn validation_requires_endpoints() {
        let err = config_with_endpoints(&[]).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingKey {
                key: ENV_COORDINATION_ENDPOINTS
            }
        ));
    }

    #[test]
    fn validation_accepts_a_populated_config() {
        config_with_endpoints(&["http://coord-0:2379"])
            .validate()
            .unwrap();
    }

    #[test]
    fn validation_rejects_a_zero_poll_interval() {
        let mut config = config_with_endpoints(&["http://coord-0:2379"]);
        config.tuning.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn from_env_reads_endpoints_and_overrides() {
        env::set_var(
            ENV_COORDINATION_ENDPOINTS,
            "http://coord-0:2379, http://coord-1:2379",
        );
        env::set_var(ENV_POLL_INTERVAL_SECS, "5");
        let config = MonitorConfig::from_env().unwrap();
        env::remove_var(ENV_COORDINATION_ENDPOINTS);
        env::remove_var(ENV_POLL_INTERVAL_SECS);

        assert_eq!(
            config.coordination.endpoints,
            vec!["http://coord-0:2379", "http://coord-1:2379"]
        );
        assert_eq!(config.tuning.poll_interval, Duration::from_secs(5));
        assert_eq!(config.tuning.teardown_delay, Duration::from_secs(10));
    }
}
