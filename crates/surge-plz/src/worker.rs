//! Load-zone worker
//!
//! One worker per live zone: registers the zone with the backend, polls
//! for assigned runs and turns each id into a TestRun resource. Workers
//! are driven only by the zone reconciler; the registry is what makes
//! them reachable across reconciles.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use surge_common::crd::{PrivateLoadZone, TestRun};
use surge_common::{Error, Result};
use surge_cloud::types::{PlzRegistrationData, PlzResources, TestRunData};
use surge_cloud::{CloudClient, TestRunPoller};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::template::{plz_test_name, TestRunTemplate};

/// Kubernetes side of run materialization
///
/// A seam over the TestRun API so the factory logic can be tested
/// without a cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TestRunStore: Send + Sync {
    /// Whether a TestRun with this name is already present
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Create the resource; `Ok(false)` means a concurrent creation won
    async fn create(&self, tr: &TestRun) -> Result<bool>;
}

struct ApiTestRunStore {
    api: Api<TestRun>,
}

#[async_trait]
impl TestRunStore for ApiTestRunStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.api.get_opt(name).await?.is_some())
    }

    async fn create(&self, tr: &TestRun) -> Result<bool> {
        match self.api.create(&PostParams::default(), tr).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Backend lookup of a run's start data
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RunDataSource: Send + Sync {
    async fn test_run_data(&self, test_run_id: &str) -> Result<TestRunData>;
}

#[async_trait]
impl RunDataSource for CloudClient {
    async fn test_run_data(&self, test_run_id: &str) -> Result<TestRunData> {
        self.get_test_run_data(test_run_id).await
    }
}

/// In-memory representation of one live load zone
pub struct PlzWorker {
    zone: String,
    namespace: String,
    kube: Client,
    cloud: Arc<CloudClient>,
    poller: TestRunPoller,
    template: TestRunTemplate,
    registration: PlzRegistrationData,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl PlzWorker {
    /// Build a worker for a zone; `api_url` is the cloud API host
    pub fn new(plz: &PrivateLoadZone, token: &str, kube: Client, api_url: &str) -> Result<Self> {
        let zone = plz.name_any();
        let cloud = Arc::new(CloudClient::new(api_url, token)?);
        let poller = TestRunPoller::new(cloud.clone(), zone.clone());

        Ok(Self {
            zone,
            namespace: plz.namespace().unwrap_or_default(),
            kube,
            cloud,
            poller,
            template: TestRunTemplate::new(plz),
            registration: registration_data(plz)?,
            consumer: Mutex::new(None),
        })
    }

    /// Zone name this worker serves
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Register the zone with the backend, returning the registration id
    pub async fn register(&self) -> Result<String> {
        let uid = self.cloud.register_zone(&self.registration).await?;
        info!(zone = %self.zone, "load zone registered with the cloud backend");
        Ok(uid)
    }

    /// Remove the zone registration, best-effort
    ///
    /// Called while the resource is being deleted, so there is nothing
    /// useful to do with a failure besides logging it.
    pub async fn deregister(&self) {
        match self.cloud.deregister_zone(&self.zone).await {
            Ok(()) => info!(zone = %self.zone, "load zone deregistered from the cloud backend"),
            Err(e) => warn!(zone = %self.zone, error = %e, "failed to deregister load zone"),
        }
    }

    /// Start polling and consuming assigned runs; a no-op when running
    pub async fn start_factory(self: &Arc<Self>) {
        if self.poller.is_polling().await {
            return;
        }

        self.poller.start().await;
        info!(zone = %self.zone, "started polling the cloud backend for new test runs");

        if let Some(mut runs) = self.poller.take_test_runs().await {
            let worker = Arc::clone(self);
            let handle = tokio::spawn(async move {
                info!(zone = %worker.zone, "started factory for load zone test runs");
                while let Some(test_run_id) = runs.recv().await {
                    worker.handle(&test_run_id).await;
                }
                debug!(zone = %worker.zone, "factory consumer finished");
            });
            *self.consumer.lock().await = Some(handle);
        }
    }

    /// Stop the poller and wait for the consumer to drain out
    pub async fn stop_factory(&self) {
        self.poller.stop().await;
        if let Some(handle) = self.consumer.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(zone = %self.zone, error = %e, "factory consumer ended abnormally");
            }
        }
    }

    /// Materialize one assigned run as a TestRun resource
    pub async fn handle(&self, test_run_id: &str) {
        let store = ApiTestRunStore {
            api: Api::namespaced(self.kube.clone(), &self.namespace),
        };
        materialize_run(test_run_id, &store, self.cloud.as_ref(), &self.template).await;
    }
}

/// Turn one assigned run id into a TestRun resource
///
/// Failures are logged, never propagated: the backend keeps listing
/// unhandled ids, so the next tick is the retry. The deterministic name
/// plus the existence check make repeated deliveries of the same id
/// collapse into a single resource.
async fn materialize_run(
    test_run_id: &str,
    store: &dyn TestRunStore,
    source: &dyn RunDataSource,
    template: &TestRunTemplate,
) {
    let name = plz_test_name(test_run_id);

    // only a confirmed absence may proceed to creation
    match store.exists(&name).await {
        Ok(true) => {
            info!(test_run_id, "test run has already been started");
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(test_run_id, error = %e, "existence check failed, skipping test run");
            return;
        }
    }

    let data = match source.test_run_data(test_run_id).await {
        Ok(data) => data,
        Err(e) => {
            warn!(test_run_id, error = %e, "failed to retrieve test run data");
            return;
        }
    };

    let tr = match template.complete(&data) {
        Ok(tr) => tr,
        Err(e) => {
            warn!(test_run_id, error = %e, "failed to build test run from zone template");
            return;
        }
    };

    info!(
        test_run_id,
        image = %data.runner_image,
        instances = data.instance_count,
        "load zone test run prepared"
    );

    match store.create(&tr).await {
        Ok(true) => info!(test_run_id, "created new test run"),
        Ok(false) => debug!(test_run_id, "test run was created concurrently"),
        Err(e) => warn!(test_run_id, error = %e, "failed to create test run"),
    }
}

/// Zone registration payload from the zone's advertised resources
fn registration_data(plz: &PrivateLoadZone) -> Result<PlzRegistrationData> {
    let cpu = match plz.spec.resources.get("cpu") {
        Some(quantity) => parse_cpu_quantity(&quantity.0)?,
        None => 0.0,
    };
    let memory = plz
        .spec
        .resources
        .get("memory")
        .map(|q| q.0.clone())
        .unwrap_or_default();

    Ok(PlzRegistrationData {
        load_zone_id: plz.name_any(),
        resources: PlzResources { cpu, memory },
    })
}

/// Parse a Kubernetes CPU quantity ("2", "0.5", "500m") into cores
fn parse_cpu_quantity(quantity: &str) -> Result<f64> {
    let parsed = match quantity.strip_suffix('m') {
        Some(millis) => millis.parse::<f64>().map(|v| v / 1000.0),
        None => quantity.parse::<f64>(),
    };
    parsed.map_err(|_| {
        Error::configuration(format!("CPU quantity `{quantity}` cannot be parsed"))
    })
}
