//! HTTP client for the cloud backend
//!
//! Thin wrapper around reqwest with `Token` auth. Server-side rejections
//! (4xx) become permanent errors, everything else stays retryable.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use surge_common::{Error, Result};
use tracing::{debug, warn};

use crate::events::Events;
use crate::types::{
    CreateTestRunRequest, CreateTestRunResponse, PlzRegistrationData, PlzRegistrationResponse,
    TestRunData, TestRunList, TestRunState,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, serde::Deserialize)]
struct TestRunStateResponse {
    #[serde(default)]
    status: i32,
}

/// Client for the cloud backend API
#[derive(Clone, Debug)]
pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CloudClient {
    /// Build a client for the given API host and account token
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal_with_context("cloud-client", e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<B: Serialize>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header("Authorization", format!("Token {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::cloud(path, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(Error::cloud_permanent(
                path,
                format!("{status}: {message}"),
            ))
        } else {
            Err(Error::cloud(path, format!("{status}: {message}")))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send::<()>(reqwest::Method::GET, path, None)
            .await?
            .json()
            .await
            .map_err(|e| Error::cloud_permanent(path, format!("invalid response body: {e}")))
    }

    /// Create a cloud run and return its reference id plus overrides
    pub async fn create_test_run(
        &self,
        request: &CreateTestRunRequest,
    ) -> Result<CreateTestRunResponse> {
        let path = "/v1/tests";
        let response: CreateTestRunResponse = self
            .send(reqwest::Method::POST, path, Some(request))
            .await?
            .json()
            .await
            .map_err(|e| Error::cloud_permanent(path, format!("invalid response body: {e}")))?;

        if response.reference_id.is_empty() {
            return Err(Error::cloud_permanent(
                path,
                "backend did not return a reference id",
            ));
        }
        Ok(response)
    }

    /// Mark a cloud run as finished
    pub async fn finish_test_run(&self, reference_id: &str) -> Result<()> {
        let path = format!("/v1/tests/{reference_id}/finished");
        self.send::<()>(reqwest::Method::POST, &path, None).await?;
        Ok(())
    }

    /// Fetch the backend's view of a run, used for abort polling
    pub async fn get_test_run_state(&self, reference_id: &str) -> Result<TestRunState> {
        let path = format!("/v1/tests/{reference_id}/status");
        let response: TestRunStateResponse = self.get_json(&path).await?;
        Ok(TestRunState(response.status))
    }

    /// Ids of runs the backend assigned to a load zone
    pub async fn list_test_runs(&self, load_zone: &str) -> Result<Vec<String>> {
        let path = format!("/get-tests?load_zone={load_zone}");
        let response: TestRunList = self.get_json(&path).await?;
        Ok(response.list)
    }

    /// Everything needed to materialize an assigned run
    pub async fn get_test_run_data(&self, test_run_id: &str) -> Result<TestRunData> {
        let path = format!("/get-test-data/{test_run_id}");
        self.get_json(&path).await
    }

    /// Register a load zone, returning the backend registration id
    pub async fn register_zone(&self, data: &PlzRegistrationData) -> Result<String> {
        let path = "/cloud-resources/v1/load-zones";
        let response: PlzRegistrationResponse = self
            .send(reqwest::Method::POST, path, Some(data))
            .await?
            .json()
            .await
            .map_err(|e| Error::cloud_permanent(path, format!("invalid response body: {e}")))?;
        Ok(response.id)
    }

    /// Remove a load zone registration
    pub async fn deregister_zone(&self, load_zone: &str) -> Result<()> {
        let path = format!("/cloud-resources/v1/load-zones/{load_zone}");
        self.send::<()>(reqwest::Method::DELETE, &path, None)
            .await?;
        Ok(())
    }

    /// Post error events for a run, best-effort
    ///
    /// Event delivery must never fail a reconcile, so errors are logged
    /// and swallowed here.
    pub async fn send_test_run_events(&self, reference_id: &str, events: Events) {
        let path = "/v1/events";
        let body = serde_json::json!({
            "test_run_id": reference_id,
            "events": events,
        });
        match self.send(reqwest::Method::POST, path, Some(&body)).await {
            Ok(_) => debug!(reference_id, "cloud events delivered"),
            Err(e) => warn!(reference_id, error = %e, "failed to deliver cloud events"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = CloudClient::new("https://api.k6.io/", "token").unwrap();
        assert_eq!(client.url("/v1/tests"), "https://api.k6.io/v1/tests");
    }

    #[test]
    fn paths_compose_with_ids() {
        let client = CloudClient::new("https://api.k6.io", "token").unwrap();
        assert_eq!(
            client.url(&format!("/v1/tests/{}/finished", "123")),
            "https://api.k6.io/v1/tests/123/finished"
        );
        assert_eq!(
            client.url(&format!("/get-tests?load_zone={}", "my-zone")),
            "https://api.k6.io/get-tests?load_zone=my-zone"
        );
    }
}
