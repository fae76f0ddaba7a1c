//! Global configuration types for casflow.
//!
//! `GlobalConfig` represents the top-level `casflow.toml` that controls where
//! the resource service lives, how the HTTP transport retries, how completion
//! polling backs off, and the per-activity retry policy of the host runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Base URL of the resource service. Overridden by `CAS_SERVER`.
    #[serde(default = "default_resource_server_url")]
    pub resource_server_url: String,

    /// HTTP transport settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Completion polling backoff.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Host retry policy applied to each activity invocation.
    #[serde(default)]
    pub activity: RetryPolicy,
}

fn default_resource_server_url() -> String {
    "http://localhost:9200".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            resource_server_url: default_resource_server_url(),
            http: HttpConfig::default(),
            polling: PollingConfig::default(),
            activity: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// Bounded retry settings for the resource service HTTP client.
///
/// Retries happen on transport failures and on HTTP 429 / 503.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
    #[serde(default = "default_retry_max_wait_ms")]
    pub retry_max_wait_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_retry_count() -> u32 {
    5
}

fn default_retry_wait_ms() -> u64 {
    1_000
}

fn default_retry_max_wait_ms() -> u64 {
    20_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            retry_wait_ms: default_retry_wait_ms(),
            retry_max_wait_ms: default_retry_max_wait_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Completion polling backoff: start at `initial_delay_secs`, double after
/// every failed check, restart from the initial delay once the next wait
/// would exceed `reset_after_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_reset_after_secs")]
    pub reset_after_secs: u64,
}

fn default_initial_delay_secs() -> u64 {
    5
}

fn default_reset_after_secs() -> u64 {
    700
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            reset_after_secs: default_reset_after_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Activity retry policy
// ---------------------------------------------------------------------------

/// Outer retry policy the host runtime applies to each activity invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on a single attempt.
    #[serde(default = "default_start_to_close_timeout_secs")]
    pub start_to_close_timeout_secs: u64,
}

fn default_initial_interval_ms() -> u64 {
    1_000
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_max_interval_ms() -> u64 {
    100_000
}

fn default_max_attempts() -> u32 {
    2
}

fn default_start_to_close_timeout_secs() -> u64 {
    1_800
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            backoff_coefficient: default_backoff_coefficient(),
            max_interval_ms: default_max_interval_ms(),
            max_attempts: default_max_attempts(),
            start_to_close_timeout_secs: default_start_to_close_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    pub fn start_to_close_timeout(&self) -> Duration {
        Duration::from_secs(self.start_to_close_timeout_secs)
    }

    /// Wait before attempt `attempt + 1`, where `attempt` is 1-based:
    /// `min(initial * coefficient^(attempt - 1), max_interval)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_interval_ms as f64 * self.backoff_coefficient.powi(exponent);
        let capped = millis.min(self.max_interval_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.resource_server_url, "http://localhost:9200");
        assert_eq!(config.http.retry_count, 5);
        assert_eq!(config.polling.initial_delay_secs, 5);
        assert_eq!(config.polling.reset_after_secs, 700);
        assert_eq!(config.activity.max_attempts, 2);
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[test]
    fn test_global_config_deserialize_partial_sections() {
        let toml_str = r#"
resource_server_url = "http://cas.internal:8080"

[http]
retry_count = 2

[activity]
max_attempts = 4
start_to_close_timeout_secs = 60
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.resource_server_url, "http://cas.internal:8080");
        assert_eq!(config.http.retry_count, 2);
        assert_eq!(config.http.retry_wait_ms, 1_000, "unset keys keep defaults");
        assert_eq!(config.polling, PollingConfig::default());
        assert_eq!(config.activity.max_attempts, 4);
        assert_eq!(config.activity.start_to_close_timeout(), Duration::from_secs(60));
        assert!((config.activity.backoff_coefficient - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_policy_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(7), Duration::from_secs(64));
        assert_eq!(policy.delay_after(8), Duration::from_secs(100));
        assert_eq!(policy.delay_after(30), Duration::from_secs(100));
    }
}
