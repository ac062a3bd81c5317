//! Operator configuration from the environment

use std::time::Duration;

use surge_cloud::DEFAULT_API_URL;

const STUCK_POD_TIMEOUT_VAR: &str = "SURGE_STUCK_POD_TIMEOUT_SECS";
const TEARDOWN_WAIT_VAR: &str = "SURGE_TEARDOWN_WAIT_SECS";
const CLOUD_HOST_VAR: &str = "CLOUD_HOST";
const WATCH_NAMESPACE_VAR: &str = "WATCH_NAMESPACE";

const DEFAULT_STUCK_POD_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TEARDOWN_WAIT: Duration = Duration::from_secs(30);

/// Tunables of the operator process
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Cloud API host used unless a run overrides it via K6_CLOUD_HOST
    pub cloud_host: String,
    /// How long pods may stay unready before an error event is raised
    pub stuck_pod_timeout: Duration,
    /// Settling time after the run stops before teardown is attempted
    pub teardown_wait: Duration,
    /// Restrict watches to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cloud_host: DEFAULT_API_URL.to_string(),
            stuck_pod_timeout: DEFAULT_STUCK_POD_TIMEOUT,
            teardown_wait: DEFAULT_TEARDOWN_WAIT,
            watch_namespace: None,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        Self {
            cloud_host: non_empty(std::env::var(CLOUD_HOST_VAR).ok())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            stuck_pod_timeout: seconds_or(
                std::env::var(STUCK_POD_TIMEOUT_VAR).ok(),
                DEFAULT_STUCK_POD_TIMEOUT,
            ),
            teardown_wait: seconds_or(std::env::var(TEARDOWN_WAIT_VAR).ok(), DEFAULT_TEARDOWN_WAIT),
            watch_namespace: non_empty(std::env::var(WATCH_NAMESPACE_VAR).ok()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn seconds_or(value: Option<String>, default: Duration) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
