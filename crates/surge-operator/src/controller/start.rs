//! Created stage: wait for the runners and resume them together
//!
//! The runners were created paused. Once every pod runs and every
//! runner API answers, setup data is propagated (for load-zone runs)
//! and the starter job fires a synchronized resume across all segments.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use surge_common::crd::{conditions, ConditionStatus, ConditionType, Stage, TestRun};
use surge_common::Result;
use tracing::{debug, info};

use crate::jobs;

use super::{hostnames, init, namespace, persist, Context, POLL_WAIT};

// the shell line of a curl pod has a length ceiling; large runs resume
// in chunks
const STARTER_BATCH_SIZE: usize = 500;

pub(super) async fn start_jobs(tr: &TestRun, ctx: &Context) -> Result<Action> {
    let name = tr.name_any();

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    let list = pods
        .list(&ListParams::default().labels(&jobs::runner_selector(&name)))
        .await?;
    let running = list
        .items
        .iter()
        .filter(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"))
        .count();

    if running < tr.spec.parallelism as usize {
        debug!(test_run = %name, running, parallelism = tr.spec.parallelism, "waiting for runner pods");
        init::report_if_stuck(tr, ctx, "runner pods").await;
        return Ok(Action::requeue(POLL_WAIT));
    }

    let Some(hosts) = hostnames(ctx, tr, true).await? else {
        return Ok(Action::requeue(POLL_WAIT));
    };

    let status = tr.status.clone().unwrap_or_default();
    if status.is_plz() {
        // setup() runs once; its result is shared with every segment
        if let Some(data) = ctx.runner_api.run_setup(&hosts[0]).await? {
            ctx.runner_api.set_setup_data(&hosts, &data).await?;
        }
    }

    if tr.spec.paused {
        info!(test_run = %name, "run is paused: skipping the starter, resume it via the runner API");
    } else {
        create_starters(tr, ctx, &hosts).await?;
    }

    let mut status = status;
    status.stage = Stage::Started;
    conditions::update_condition(
        &mut status.conditions,
        ConditionType::TestRunRunning,
        ConditionStatus::True,
    );
    persist(ctx, tr, &status).await?;
    info!(test_run = %name, "test run started");
    Ok(Action::requeue(POLL_WAIT))
}

async fn create_starters(tr: &TestRun, ctx: &Context, hosts: &[String]) -> Result<()> {
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    let batched = hosts.len() > STARTER_BATCH_SIZE;

    for (batch, chunk) in hosts.chunks(STARTER_BATCH_SIZE).enumerate() {
        let mut job = jobs::starter_job(tr, chunk);
        if batched {
            job.metadata.name = job.metadata.name.map(|n| batch_name(&n, batch));
        }
        match api.create(&PostParams::default(), &job).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn batch_name(base: &str, batch: usize) -> String {
    format!("{base}-batch-{batch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_names_are_stable() {
        assert_eq!(batch_name("smoke-starter", 0), "smoke-starter-batch-0");
        assert_eq!(batch_name("smoke-starter", 7), "smoke-starter-batch-7");
    }
}
