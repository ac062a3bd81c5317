//! Wire types for the cloud backend API

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::EnvVar;
use serde::{Deserialize, Serialize};

// =============================================================================
// Test runs
// =============================================================================

/// Response of `/get-tests`: ids of runs assigned to a load zone
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TestRunList {
    /// Backend run ids awaiting execution
    #[serde(default)]
    pub list: Vec<String>,
}

/// Response of `/get-test-data/{id}`: everything a load zone needs to
/// materialize a run
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestRunData {
    /// Backend run id
    pub test_run_id: String,
    /// Where the packed test archive can be downloaded
    #[serde(default)]
    pub archive_url: String,
    /// k6 image the backend wants the runners to use
    #[serde(default)]
    pub runner_image: String,
    /// How many runner instances to spread the test across
    #[serde(default)]
    pub instance_count: i32,
    /// Extra environment for the runners
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Encoded metric-aggregation settings, if the backend set any
    #[serde(default)]
    pub aggregation_vars: Option<String>,
}

impl TestRunData {
    /// Backend-provided environment as pod env vars
    pub fn env_vars(&self) -> Vec<EnvVar> {
        self.environment
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect()
    }
}

/// Coarse backend run state from `/v1/tests/{id}/status`
///
/// The backend's run-status codes: 3 means finished, anything from 5
/// upwards is one of the aborted flavors.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TestRunState(pub i32);

impl TestRunState {
    /// The backend asked for this run to stop
    pub fn aborted(&self) -> bool {
        self.0 >= 5
    }

    /// The run completed normally
    pub fn finished(&self) -> bool {
        self.0 == 3
    }
}

// =============================================================================
// Run creation
// =============================================================================

/// Body of `POST /v1/tests`
///
/// Field names follow the backend's API; `process_thresholds` asks the
/// backend to evaluate thresholds server-side.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CreateTestRunRequest {
    /// Test name shown in the cloud UI
    pub name: String,
    /// Target project, 0 means the default project
    #[serde(skip_serializing_if = "is_zero")]
    pub project_id: i64,
    /// Peak VU count from script inspection
    pub vus: i64,
    /// Threshold sources keyed by metric name
    pub thresholds: BTreeMap<String, Vec<String>>,
    /// Planned duration in seconds
    pub duration: i64,
    /// Evaluate thresholds server-side
    pub process_thresholds: bool,
    /// Number of runner instances
    pub instances: i32,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Metric-aggregation overrides returned on run creation
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregationConfig {
    /// Minimum samples before aggregating
    #[serde(default)]
    pub aggregation_min_samples: i64,
    /// Aggregation window, Go duration syntax (e.g. "3s")
    #[serde(default)]
    pub aggregation_period: String,
    /// Wait before flushing a window
    #[serde(default)]
    pub aggregation_wait_period: String,
    /// Push cadence for aggregated metrics
    #[serde(default)]
    pub metric_push_interval: String,
    /// Per-package sample cap
    #[serde(default)]
    pub max_metric_samples_per_package: i64,
    /// Parallel pushes allowed
    #[serde(default)]
    pub metric_push_concurrency: i64,
}

/// Response of `POST /v1/tests`
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CreateTestRunResponse {
    /// Backend run id; empty means the backend refused the run
    #[serde(default)]
    pub reference_id: String,
    /// Aggregation overrides for the runner pods
    #[serde(default, rename = "config")]
    pub config_override: Option<AggregationConfig>,
}

// =============================================================================
// Script inspection
// =============================================================================

/// Cloud options block inside inspect output
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CloudOptions {
    /// Test name
    #[serde(default)]
    pub name: Option<String>,
    /// Target project
    #[serde(default, rename = "projectID")]
    pub project_id: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct InspectExt {
    #[serde(default)]
    pub loadimpact: Option<CloudOptions>,
}

/// Parsed output of `k6 inspect --execution-requirements`
///
/// Cloud options may live under the modern `cloud` key or the legacy
/// `ext.loadimpact` one; the modern key wins when both are present.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct InspectOutput {
    /// Peak VU count the script can reach
    #[serde(default, rename = "maxVUs")]
    pub max_vus: u64,
    /// Total planned duration, Go duration syntax
    #[serde(default, rename = "totalDuration")]
    pub total_duration: String,
    /// Threshold sources keyed by metric name
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
    /// Modern cloud options
    #[serde(default)]
    pub cloud: Option<CloudOptions>,
    #[serde(default)]
    pub(crate) ext: InspectExt,
}

const DEFAULT_TEST_NAME: &str = "k6-operator-test";

impl InspectOutput {
    fn options(&self) -> Option<&CloudOptions> {
        self.cloud.as_ref().or(self.ext.loadimpact.as_ref())
    }

    /// Test name for the cloud UI
    pub fn test_name(&self) -> &str {
        self.options()
            .and_then(|o| o.name.as_deref())
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_TEST_NAME)
    }

    /// Target project id, 0 when unset
    pub fn project_id(&self) -> i64 {
        self.options().and_then(|o| o.project_id).unwrap_or(0)
    }

    /// Planned duration in whole seconds
    pub fn duration_seconds(&self) -> i64 {
        parse_go_duration(&self.total_duration)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// Parse a Go-style duration string ("1h2m3s", "500ms", "10m0s")
///
/// Returns `None` for empty or malformed input; sub-second precision is
/// kept, negative durations are rejected.
pub fn parse_go_duration(s: &str) -> Option<Duration> {
    if s.is_empty() || s.starts_with('-') {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            num.push(c);
            continue;
        }
        let unit = if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            "ms"
        } else {
            match c {
                'h' => "h",
                'm' => "m",
                's' => "s",
                _ => return None,
            }
        };
        let value: f64 = num.parse().ok()?;
        num.clear();
        let secs = match unit {
            "h" => value * 3600.0,
            "m" => value * 60.0,
            "s" => value,
            _ => value / 1000.0,
        };
        total += Duration::from_secs_f64(secs);
    }

    if num.is_empty() {
        Some(total)
    } else {
        None
    }
}

// =============================================================================
// Load zone registration
// =============================================================================

/// Per-runner resources advertised at zone registration
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct PlzResources {
    /// CPU per runner, in cores
    pub cpu: f64,
    /// Memory per runner, quantity string (e.g. "1Gi")
    pub memory: String,
}

/// Body of `POST /cloud-resources/v1/load-zones`
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct PlzRegistrationData {
    /// Zone name, unique per account
    pub load_zone_id: String,
    /// Per-runner resources
    pub resources: PlzResources,
}

/// Registration response; the id is stored as an annotation on the zone
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct PlzRegistrationResponse {
    #[serde(default)]
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_thresholds() {
        assert!(!TestRunState(2).aborted());
        assert!(TestRunState(3).finished());
        assert!(!TestRunState(3).aborted());
        assert!(TestRunState(5).aborted());
        assert!(TestRunState(7).aborted());
    }

    #[test]
    fn inspect_output_name_priority() {
        // legacy only
        let out: InspectOutput =
            serde_json::from_str(r#"{"ext":{"loadimpact":{"name":"test","projectID":123}}}"#)
                .unwrap();
        assert_eq!(out.test_name(), "test");
        assert_eq!(out.project_id(), 123);

        // modern only
        let out: InspectOutput =
            serde_json::from_str(r#"{"cloud":{"name":"lorem","projectID":321}}"#).unwrap();
        assert_eq!(out.test_name(), "lorem");
        assert_eq!(out.project_id(), 321);

        // both present, modern wins
        let out: InspectOutput = serde_json::from_str(
            r#"{"cloud":{"name":"ipsum","projectID":987},"ext":{"loadimpact":{"name":"test","projectID":123}}}"#,
        )
        .unwrap();
        assert_eq!(out.test_name(), "ipsum");
        assert_eq!(out.project_id(), 987);

        // neither
        let out: InspectOutput = serde_json::from_str("{}").unwrap();
        assert_eq!(out.test_name(), "k6-operator-test");
        assert_eq!(out.project_id(), 0);
    }

    #[test]
    fn inspect_output_execution_requirements() {
        let out: InspectOutput = serde_json::from_str(
            r#"{"maxVUs":30,"totalDuration":"10m0s","thresholds":{"http_req_duration":["p(95)<500"]}}"#,
        )
        .unwrap();
        assert_eq!(out.max_vus, 30);
        assert_eq!(out.duration_seconds(), 600);
        assert_eq!(out.thresholds["http_req_duration"], vec!["p(95)<500"]);
    }

    #[test]
    fn go_duration_parsing() {
        assert_eq!(parse_go_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_go_duration("10m0s"), Some(Duration::from_secs(600)));
        assert_eq!(
            parse_go_duration("1h2m3s"),
            Some(Duration::from_secs(3723))
        );
        assert_eq!(parse_go_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_go_duration(""), None);
        assert_eq!(parse_go_duration("10"), None);
        assert_eq!(parse_go_duration("-5s"), None);
        assert_eq!(parse_go_duration("5x"), None);
    }

    #[test]
    fn test_run_data_env_vars() {
        let mut environment = BTreeMap::new();
        environment.insert("K6_CLOUD_TOKEN".to_string(), "secret".to_string());
        let data = TestRunData {
            test_run_id: "42".to_string(),
            environment,
            ..Default::default()
        };
        let vars = data.env_vars();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "K6_CLOUD_TOKEN");
        assert_eq!(vars[0].value.as_deref(), Some("secret"));
    }

    #[test]
    fn create_request_serializes_backend_field_names() {
        let req = CreateTestRunRequest {
            name: "load-test".to_string(),
            project_id: 0,
            vus: 30,
            thresholds: BTreeMap::new(),
            duration: 600,
            process_thresholds: true,
            instances: 4,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["process_thresholds"], true);
        assert_eq!(json["instances"], 4);
        // zero project id is omitted so the backend uses the default project
        assert!(json.get("project_id").is_none());
    }

    #[test]
    fn create_response_reads_config_override() {
        let resp: CreateTestRunResponse = serde_json::from_str(
            r#"{"reference_id":"123","config":{"aggregationMinSamples":50,"aggregationPeriod":"3s"}}"#,
        )
        .unwrap();
        assert_eq!(resp.reference_id, "123");
        let config = resp.config_override.unwrap();
        assert_eq!(config.aggregation_min_samples, 50);
        assert_eq!(config.aggregation_period, "3s");
    }
}
