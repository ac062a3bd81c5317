//! Starter and stop job builders
//!
//! Both are one-shot curl pods issuing the same status PATCH against
//! every runner service: the starter resumes paused runners, the stop
//! job halts a test mid-flight.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use surge_common::crd::TestRun;
use surge_common::RUNNER_API_PORT;

use crate::runner_api::{resume_body, stop_body};

use super::{common_labels, optional_map, owned_meta, pod_options, quantities};

const DEFAULT_STARTER_IMAGE: &str = "ghcr.io/grafana/k6-operator:latest-starter";

/// Job resuming every runner of a run
pub fn starter_job(tr: &TestRun, hostnames: &[String]) -> Job {
    curl_job(tr, format!("{}-starter", tr.name_any()), hostnames, &resume_body())
}

/// Job stopping every runner of a run
pub fn stop_job(tr: &TestRun, hostnames: &[String]) -> Job {
    curl_job(tr, format!("{}-stopper", tr.name_any()), hostnames, &stop_body())
}

fn curl_job(tr: &TestRun, name: String, hostnames: &[String], body: &str) -> Job {
    let tr_name = tr.name_any();
    let options = pod_options(&tr.spec.starter);
    let labels = common_labels(&tr_name);

    let parts: Vec<String> = hostnames
        .iter()
        .map(|host| {
            format!(
                "curl --retry 3 -X PATCH -H 'Content-Type: application/json' http://{host}:{RUNNER_API_PORT}/v1/status -d '{body}'"
            )
        })
        .collect();

    Job {
        metadata: owned_meta(tr, name, labels.clone()),
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: options.service_account_name.clone(),
                    node_selector: optional_map(&options.node_selector),
                    image_pull_secrets: if options.image_pull_secrets.is_empty() {
                        None
                    } else {
                        Some(options.image_pull_secrets.clone())
                    },
                    containers: vec![Container {
                        name: "k6-curl".to_string(),
                        image: Some(
                            options
                                .image
                                .clone()
                                .unwrap_or_else(|| DEFAULT_STARTER_IMAGE.to_string()),
                        ),
                        command: Some(vec![
                            "sh".to_string(),
                            "-c".to_string(),
                            parts.join(";"),
                        ]),
                        env: if options.env.is_empty() {
                            None
                        } else {
                            Some(options.env.clone())
                        },
                        resources: Some(ResourceRequirements {
                            requests: Some(quantities(&[("cpu", "50m"), ("memory", "2Mi")])),
                            limits: Some(quantities(&[("cpu", "100m"), ("memory", "200Mi")])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
