//! Runner job and service builders

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use surge_common::crd::TestRun;
use surge_common::{Result, RUNNER_API_PORT};

use super::{optional_map, owned_meta, pod_options, runner_labels, segment_args};

pub(super) const DEFAULT_RUNNER_IMAGE: &str = "ghcr.io/grafana/k6-operator:latest-runner";

/// Build runner job `index` (1-based) of a run
///
/// Runners always start paused and listen on the runner API port; the
/// starter job resumes them once every runner is up, so that all
/// segments begin at the same moment.
pub fn runner_job(tr: &TestRun, index: i32, token: Option<&str>) -> Result<Job> {
    let tr_name = tr.name_any();
    let name = format!("{tr_name}-{index}");
    let options = pod_options(&tr.spec.runner);
    let script = &tr.spec.script;

    let mut command = vec!["k6".to_string(), "run".to_string(), "--quiet".to_string()];
    if tr.spec.parallelism > 1 {
        command.extend(segment_args(index, tr.spec.parallelism)?);
    }
    if let Some(arguments) = &tr.spec.arguments {
        command.extend(arguments.split_whitespace().map(String::from));
    }
    command.push(script.full_path()?);
    command.push(format!("--address=0.0.0.0:{RUNNER_API_PORT}"));
    command.push("--paused".to_string());
    let command = script.wrap_command(command)?;

    let mut env = options.env.clone();
    if let Some(token) = token {
        env.push(EnvVar {
            name: "K6_CLOUD_TOKEN".to_string(),
            value: Some(token.to_string()),
            ..Default::default()
        });
    }
    if let Some(id) = tr.status.as_ref().and_then(|s| s.test_run_id.as_deref()) {
        env.push(EnvVar {
            name: "K6_CLOUD_PUSH_REF_ID".to_string(),
            value: Some(id.to_string()),
            ..Default::default()
        });
    }

    let mut volumes = script.volumes();
    volumes.extend(options.volumes.clone());
    let mut volume_mounts = script.volume_mounts();
    volume_mounts.extend(options.volume_mounts.clone());

    // init containers share the script mounts
    let init_containers: Vec<Container> = options
        .init_containers
        .iter()
        .enumerate()
        .map(|(i, container)| {
            let mut container = container.clone();
            if container.name.is_empty() {
                container.name = format!("k6-init-{i}");
            }
            let mut mounts = script.volume_mounts();
            mounts.extend(container.volume_mounts.unwrap_or_default());
            container.volume_mounts = if mounts.is_empty() { None } else { Some(mounts) };
            container
        })
        .collect();

    let labels = runner_labels(&tr_name);

    Ok(Job {
        metadata: owned_meta(tr, name.clone(), labels.clone()),
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    hostname: Some(name),
                    restart_policy: Some("Never".to_string()),
                    termination_grace_period_seconds: Some(0),
                    service_account_name: options.service_account_name.clone(),
                    node_selector: optional_map(&options.node_selector),
                    image_pull_secrets: if options.image_pull_secrets.is_empty() {
                        None
                    } else {
                        Some(options.image_pull_secrets.clone())
                    },
                    init_containers: if init_containers.is_empty() {
                        None
                    } else {
                        Some(init_containers)
                    },
                    containers: vec![Container {
                        name: "k6".to_string(),
                        image: Some(
                            options
                                .image
                                .clone()
                                .unwrap_or_else(|| DEFAULT_RUNNER_IMAGE.to_string()),
                        ),
                        command: Some(command),
                        env: if env.is_empty() { None } else { Some(env) },
                        env_from: if options.env_from.is_empty() {
                            None
                        } else {
                            Some(options.env_from.clone())
                        },
                        resources: options.resources.clone(),
                        ports: Some(vec![ContainerPort {
                            container_port: RUNNER_API_PORT.into(),
                            ..Default::default()
                        }]),
                        volume_mounts: if volume_mounts.is_empty() {
                            None
                        } else {
                            Some(volume_mounts)
                        },
                        ..Default::default()
                    }],
                    volumes: if volumes.is_empty() { None } else { Some(volumes) },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Service exposing one runner's API inside the cluster
pub fn runner_service(tr: &TestRun, index: i32) -> Service {
    let tr_name = tr.name_any();
    let runner_name = format!("{tr_name}-{index}");

    let mut selector = std::collections::BTreeMap::new();
    selector.insert("job-name".to_string(), runner_name);

    Service {
        metadata: owned_meta(
            tr,
            format!("{tr_name}-service-{index}"),
            runner_labels(&tr_name),
        ),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http-api".to_string()),
                port: RUNNER_API_PORT.into(),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::sample_test_run;
    use super::*;
    use surge_common::crd::TestRunStatus;

    #[test]
    fn runner_command_splits_the_load() {
        let tr = sample_test_run();
        let job = runner_job(&tr, 2, None).unwrap();

        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let command = container.command.as_ref().unwrap();
        assert_eq!(&command[..3], &["k6", "run", "--quiet"]);
        assert!(command.contains(&"--execution-segment=1/4:2/4".to_string()));
        assert!(command.contains(&"--vus".to_string()));
        assert!(command.contains(&"/test/test.js".to_string()));
        assert!(command.contains(&"--paused".to_string()));
        assert!(command.contains(&"--address=0.0.0.0:6565".to_string()));
    }

    #[test]
    fn runner_job_carries_identity_and_labels() {
        let tr = sample_test_run();
        let job = runner_job(&tr, 1, None).unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("smoke-1"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("loadtests"));
        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["app"], "k6");
        assert_eq!(labels["k6_cr"], "smoke");
        assert_eq!(labels["runner"], "true");
        assert_eq!(job.metadata.owner_references.as_ref().unwrap().len(), 1);

        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.hostname.as_deref(), Some("smoke-1"));
        assert_eq!(pod.termination_grace_period_seconds, Some(0));
    }

    #[test]
    fn cloud_runs_get_token_and_ref_id() {
        let mut tr = sample_test_run();
        tr.status = Some(TestRunStatus {
            test_run_id: Some("4242".to_string()),
            ..Default::default()
        });
        let job = runner_job(&tr, 1, Some("secret-token")).unwrap();

        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "K6_CLOUD_TOKEN" && e.value.as_deref() == Some("secret-token")));
        assert!(env
            .iter()
            .any(|e| e.name == "K6_CLOUD_PUSH_REF_ID" && e.value.as_deref() == Some("4242")));
    }

    #[test]
    fn single_runner_has_no_segments() {
        let mut tr = sample_test_run();
        tr.spec.parallelism = 1;
        let job = runner_job(&tr, 1, None).unwrap();
        let container = &job.spec.unwrap().template.spec.unwrap().containers[0];
        assert!(!container
            .command
            .as_ref()
            .unwrap()
            .iter()
            .any(|c| c.starts_with("--execution-segment")));
    }

    #[test]
    fn service_selects_its_runner_pod() {
        let tr = sample_test_run();
        let service = runner_service(&tr, 3);

        assert_eq!(service.metadata.name.as_deref(), Some("smoke-service-3"));
        let spec = service.spec.unwrap();
        assert_eq!(spec.selector.unwrap()["job-name"], "smoke-3");
        assert_eq!(spec.ports.unwrap()[0].port, 6565);
    }
}
