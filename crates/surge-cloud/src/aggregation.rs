//! Metric-aggregation config codec
//!
//! The backend returns aggregation overrides when a cloud run is
//! created. They travel through the TestRun status as one packed string
//! (`aggregationVars`) and are unpacked into the `K6_CLOUD_*` env vars
//! of runner pods.

use k8s_openapi::api::core::v1::EnvVar;
use surge_common::{Error, Result};

use crate::types::AggregationConfig;

/// Env var names, in packing order
pub const AGGREGATION_VAR_NAMES: [&str; 6] = [
    "K6_CLOUD_AGGREGATION_MIN_SAMPLES",
    "K6_CLOUD_AGGREGATION_PERIOD",
    "K6_CLOUD_AGGREGATION_WAIT_PERIOD",
    "K6_CLOUD_METRIC_PUSH_INTERVAL",
    "K6_CLOUD_MAX_METRIC_SAMPLES_PER_PACKAGE",
    "K6_CLOUD_MAX_METRIC_PUSH_CONCURRENCY",
];

/// Pack aggregation overrides into the status string
pub fn encode(config: &AggregationConfig) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        config.aggregation_min_samples,
        config.aggregation_period,
        config.aggregation_wait_period,
        config.metric_push_interval,
        config.max_metric_samples_per_package,
        config.metric_push_concurrency
    )
}

/// Unpack a status string into runner env vars
///
/// The string is produced by [`encode`]; any other shape means the
/// status was corrupted and the run cannot proceed safely.
pub fn decode(encoded: &str) -> Result<Vec<EnvVar>> {
    let values: Vec<&str> = encoded.split('|').collect();
    if values.len() != AGGREGATION_VAR_NAMES.len() {
        return Err(Error::serialization(format!(
            "aggregation vars got corrupted: {} values instead of {} in `{encoded}`",
            values.len(),
            AGGREGATION_VAR_NAMES.len(),
        )));
    }

    Ok(AGGREGATION_VAR_NAMES
        .iter()
        .zip(values)
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        })
        .collect())
}
