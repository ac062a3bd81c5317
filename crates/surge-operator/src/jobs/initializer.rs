//! Initializer job builder
//!
//! A one-shot job that archives the script and prints the execution
//! requirements (`k6 inspect`) as JSON on stdout. The controller reads
//! that JSON back from the pod logs, so the command goes to some length
//! to keep stdout pure: k6 logs are diverted to a temp file and only
//! scanned for errors afterwards.

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use surge_common::crd::TestRun;
use surge_common::Result;

use super::runner::DEFAULT_RUNNER_IMAGE;
use super::{common_labels, optional_map, owned_meta, pod_options};

/// Build the initializer job for a run
pub fn initializer_job(tr: &TestRun, archive_args: &str) -> Result<Job> {
    let tr_name = tr.name_any();
    let options = pod_options(&tr.spec.initializer.clone().or_else(|| tr.spec.runner.clone()));
    let script = &tr.spec.script;

    let script_path = script.full_path()?;
    let file_name = script_path.rsplit('/').next().unwrap_or("test.js");
    let archive = format!("./{file_name}.archived.tar");

    let mut archive_cmd = format!("k6 archive {script_path} -O {archive}");
    if !archive_args.trim().is_empty() {
        archive_cmd.push(' ');
        archive_cmd.push_str(archive_args.trim());
    }
    let command = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "{archive_cmd} 2> /tmp/k6logs && k6 inspect --execution-requirements {archive} 2> /tmp/k6logs ; ! cat /tmp/k6logs | grep 'level=error'"
        ),
    ];

    let mut volumes = script.volumes();
    volumes.extend(options.volumes.clone());
    let mut volume_mounts = script.volume_mounts();
    volume_mounts.extend(options.volume_mounts.clone());

    let labels = common_labels(&tr_name);

    Ok(Job {
        metadata: owned_meta(tr, format!("{tr_name}-initializer"), labels.clone()),
        spec: Some(JobSpec {
            backoff_limit: Some(0),
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
                        name: "k6".to_string(),
                        image: Some(
                            options
                                .image
                                .clone()
                                .unwrap_or_else(|| DEFAULT_RUNNER_IMAGE.to_string()),
                        ),
                        command: Some(command),
                        env: if options.env.is_empty() {
                            None
                        } else {
                            Some(options.env.clone())
                        },
                        env_from: if options.env_from.is_empty() {
                            None
                        } else {
                            Some(options.env_from.clone())
                        },
                        resources: options.resources.clone(),
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
