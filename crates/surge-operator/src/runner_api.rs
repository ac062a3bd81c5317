//! REST surface of the k6 runners
//!
//! Every runner pod serves an HTTP API on port 6565. The controller
//! probes it for readiness, reads the running flag, propagates setup
//! data across runners and invokes teardown. Starter/stop jobs use the
//! same API through curl; the request bodies are built here so both
//! sides stay in sync.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use surge_common::{Error, Result, RUNNER_API_PORT};
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Status API bodies
// ============================================================================

fn status_request(attributes: Value) -> String {
    json!({
        "data": {
            "attributes": attributes,
            "id": "default",
            "type": "status",
        }
    })
    .to_string()
}

/// PATCH body resuming paused runners
pub fn resume_body() -> String {
    status_request(json!({ "paused": false }))
}

/// PATCH body stopping a running test
pub fn stop_body() -> String {
    status_request(json!({ "stopped": true }))
}

#[derive(Debug, Deserialize)]
struct StatusEnvelope {
    data: StatusData,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    attributes: StatusAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct StatusAttributes {
    #[serde(default)]
    running: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SetupEnvelope {
    data: SetupData,
}

#[derive(Debug, Deserialize)]
struct SetupData {
    attributes: SetupAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct SetupAttributes {
    #[serde(default)]
    data: Option<Value>,
}

// ============================================================================
// Client
// ============================================================================

fn base_url(host: &str) -> String {
    format!("http://{host}:{RUNNER_API_PORT}")
}

/// HTTP client for the runner pods
///
/// Probes use a short timeout; setup/teardown calls run without one
/// since `setup()` may legitimately take a long time.
pub struct RunnerApi {
    probe: reqwest::Client,
    control: reqwest::Client,
}

impl RunnerApi {
    pub fn new() -> Result<Self> {
        let probe = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| Error::internal_with_context("runner-api", e.to_string()))?;
        let control = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::internal_with_context("runner-api", e.to_string()))?;
        Ok(Self { probe, control })
    }

    /// Whether a runner responds to its status endpoint
    pub async fn is_service_ready(&self, host: &str) -> bool {
        let url = format!("{}/v1/status", base_url(host));
        match self.probe.get(&url).send().await {
            Ok(resp) => resp.status().as_u16() < 400,
            Err(e) => {
                debug!(host, error = %e, "runner status probe failed");
                false
            }
        }
    }

    /// Whether a runner is still executing the test
    ///
    /// An unreachable runner counts as not running (the pod is gone); a
    /// reachable one that can't be parsed counts as running, erring on
    /// the side of waiting longer.
    pub async fn is_job_running(&self, host: &str) -> bool {
        let url = format!("{}/v1/status", base_url(host));
        let resp = match self.probe.get(&url).send().await {
            Ok(resp) => resp,
            Err(_) => return false,
        };

        if resp.status().as_u16() >= 400 {
            warn!(host, status = %resp.status(), "runner returned an error status");
            return true;
        }

        match resp.json::<StatusEnvelope>().await {
            Ok(envelope) => envelope.data.attributes.running.unwrap_or(true),
            Err(e) => {
                warn!(host, error = %e, "could not parse runner status");
                true
            }
        }
    }

    /// Invoke `setup()` on one runner and return its setup data
    pub async fn run_setup(&self, host: &str) -> Result<Option<Value>> {
        let url = format!("{}/v1/setup", base_url(host));
        let resp = self
            .control
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::internal_with_context("runner-api", format!("setup: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::internal_with_context(
                "runner-api",
                format!("setup on {host} returned {}", resp.status()),
            ));
        }

        let envelope: SetupEnvelope = resp
            .json()
            .await
            .map_err(|e| Error::internal_with_context("runner-api", format!("setup: {e}")))?;
        Ok(envelope.data.attributes.data)
    }

    /// Fan the setup data out to every runner
    pub async fn set_setup_data(&self, hosts: &[String], data: &Value) -> Result<()> {
        for host in hosts {
            let url = format!("{}/v1/setup", base_url(host));
            let resp = self
                .control
                .put(&url)
                .json(data)
                .send()
                .await
                .map_err(|e| {
                    Error::internal_with_context("runner-api", format!("setup data: {e}"))
                })?;

            if !resp.status().is_success() {
                return Err(Error::internal_with_context(
                    "runner-api",
                    format!("setup data on {host} returned {}", resp.status()),
                ));
            }
        }
        Ok(())
    }

    /// Invoke `teardown()` on the first responsive runner
    pub async fn run_teardown(&self, hosts: &[String]) -> Result<()> {
        let host = hosts.first().ok_or_else(|| {
            Error::internal_with_context("runner-api", "no runner service is available to run teardown")
        })?;

        let url = format!("{}/v1/teardown", base_url(host));
        let resp = self
            .control
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::internal_with_context("runner-api", format!("teardown: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::internal_with_context(
                "runner-api",
                format!("teardown on {host} returned {}", resp.status()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_body_shape() {
        let body: Value = serde_json::from_str(&resume_body()).unwrap();
        assert_eq!(body["data"]["attributes"]["paused"], false);
        assert_eq!(body["data"]["id"], "default");
        assert_eq!(body["data"]["type"], "status");
        assert!(body["data"]["attributes"].get("stopped").is_none());
    }

    #[test]
    fn stop_body_shape() {
        let body: Value = serde_json::from_str(&stop_body()).unwrap();
        assert_eq!(body["data"]["attributes"]["stopped"], true);
        assert!(body["data"]["attributes"].get("paused").is_none());
    }

    #[test]
    fn status_envelope_parses_running_flag() {
        let raw = r#"{"data":{"type":"status","id":"default","attributes":{"paused":false,"vus":10,"running":true,"stopped":false,"tainted":false}}}"#;
        let envelope: StatusEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.data.attributes.running, Some(true));
    }

    #[test]
    fn setup_envelope_tolerates_null_data() {
        let raw = r#"{"data":{"type":"setupData","id":"default","attributes":{"data":null}}}"#;
        let envelope: SetupEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.attributes.data.is_none());
    }
}
