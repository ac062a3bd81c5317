//! TestRun template for load-zone runs
//!
//! Every run a zone materializes shares the same skeleton: an emptyDir
//! archive volume, the zone's pod defaults and the zone's token. The
//! per-run bits (image, parallelism, archive, env, arguments) are
//! overlaid when the run id arrives.

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, ResourceRequirements, Volume, VolumeMount,
};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use surge_common::crd::{
    Cleanup, PodOptions, PrivateLoadZone, Script, TestRun, TestRunSpec,
};
use surge_common::Result;
use surge_cloud::types::TestRunData;
use surge_cloud::{aggregation, DEFAULT_INGEST_URL};

const ARCHIVE_VOLUME: &str = "archive-volume";
const ARCHIVE_PATH: &str = "/test/archive.tar";
const ARCHIVE_HELPER_IMAGE: &str = "ghcr.io/grafana/k6-operator:latest-starter";
const LOKI_PUSH_URL: &str = "https://cloudlogs.k6.io/api/v1/push";

/// Deterministic TestRun name for a backend run id
///
/// Creation is retried freely; the fixed name is what makes duplicate
/// deliveries of the same id collapse into one resource.
pub fn plz_test_name(test_run_id: &str) -> String {
    format!("plz-test-{test_run_id}")
}

/// Skeleton TestRun shared by all runs of one zone
#[derive(Clone, Debug)]
pub struct TestRunTemplate {
    zone_name: String,
    base: TestRun,
}

impl TestRunTemplate {
    /// Build the skeleton from the zone's spec
    ///
    /// Only zone-wide fields are set here; see [`TestRunTemplate::complete`]
    /// for the per-run overlay.
    pub fn new(plz: &PrivateLoadZone) -> Self {
        let volume = Volume {
            name: ARCHIVE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        };
        let volume_mount = VolumeMount {
            name: ARCHIVE_VOLUME.to_string(),
            mount_path: "/test".to_string(),
            ..Default::default()
        };

        let resources = if plz.spec.resources.is_empty() {
            None
        } else {
            Some(ResourceRequirements {
                limits: Some(plz.spec.resources.clone()),
                ..Default::default()
            })
        };

        let base = TestRun {
            metadata: ObjectMeta {
                namespace: plz.namespace(),
                owner_references: plz.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            spec: TestRunSpec {
                script: Script {
                    local_file: Some(ARCHIVE_PATH.to_string()),
                    ..Default::default()
                },
                runner: Some(PodOptions {
                    image_pull_secrets: plz.spec.image_pull_secrets.clone(),
                    service_account_name: plz.spec.service_account_name.clone(),
                    node_selector: plz.spec.node_selector.clone(),
                    resources,
                    volumes: vec![volume],
                    volume_mounts: vec![volume_mount],
                    env_from: plz.spec.config.clone(),
                    ..Default::default()
                }),
                starter: Some(PodOptions {
                    service_account_name: plz.spec.service_account_name.clone(),
                    node_selector: plz.spec.node_selector.clone(),
                    image_pull_secrets: plz.spec.image_pull_secrets.clone(),
                    ..Default::default()
                }),
                cleanup: Some(Cleanup::Post),
                token: Some(plz.spec.token.clone()),
                ..Default::default()
            },
            status: None,
        };

        Self {
            zone_name: plz.name_any(),
            base,
        }
    }

    /// Overlay one run's data onto the skeleton
    pub fn complete(&self, data: &TestRunData) -> Result<TestRun> {
        let mut tr = self.base.clone();
        tr.metadata.name = Some(plz_test_name(&data.test_run_id));

        let mut env = data.env_vars();
        env.push(EnvVar {
            name: "K6_CLOUD_HOST".to_string(),
            value: Some(DEFAULT_INGEST_URL.to_string()),
            ..Default::default()
        });
        if let Some(encoded) = &data.aggregation_vars {
            env.extend(aggregation::decode(encoded)?);
        }

        // runner is always present on the skeleton
        if let Some(runner) = tr.spec.runner.as_mut() {
            runner.image = Some(data.runner_image.clone());
            runner.init_containers = vec![archive_download_container(
                &data.archive_url,
                &runner.volume_mounts,
            )];
            runner.env = env;
        }

        tr.spec.parallelism = data.instance_count;
        tr.spec.arguments = Some(format!(
            "--out cloud --no-thresholds --log-output=loki={LOKI_PUSH_URL},label.lz={},label.test_run_id={},header.Authorization=\"Token $(K6_CLOUD_TOKEN)\"",
            self.zone_name, data.test_run_id,
        ));
        tr.spec.test_run_id = Some(data.test_run_id.clone());

        Ok(tr)
    }
}

/// Init container downloading the packed test archive
fn archive_download_container(archive_url: &str, mounts: &[VolumeMount]) -> Container {
    Container {
        name: "archive-download".to_string(),
        image: Some(ARCHIVE_HELPER_IMAGE.to_string()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("curl -X GET -L '{archive_url}' > {ARCHIVE_PATH} ; ls -l /test"),
        ]),
        volume_mounts: Some(mounts.to_vec()),
        ..Default::default()
    }
}
