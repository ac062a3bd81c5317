//! Started stage: watch the runners until the test is over
//!
//! Plain runs are done when every runner job has drained; load-zone
//! runs additionally execute `teardown()` exactly once, after a
//! settling period, before the stage moves on.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ListParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use surge_cloud::ErrorCode;
use surge_common::crd::{conditions, ConditionStatus, ConditionType, Stage, TestRun, TestRunStatus};
use surge_common::Result;
use tracing::{debug, error, info};

use crate::jobs;

use super::{hostnames, namespace, persist, send_error_event, stop, Context, POLL_WAIT};

const FINISH_POLL_WAIT: Duration = Duration::from_secs(15);

pub(super) async fn wait_for_finish(tr: &TestRun, ctx: &Context) -> Result<Action> {
    let name = tr.name_any();
    let status = tr.status.clone().unwrap_or_default();

    // a finalized or aborted run already went down another path
    if conditions::is_true(&status.conditions, ConditionType::CloudTestRunFinalized)
        || conditions::is_true(&status.conditions, ConditionType::CloudTestRunAborted)
    {
        return Ok(Action::await_change());
    }

    if status.is_plz()
        && conditions::is_false(&status.conditions, ConditionType::TeardownExecuted)
    {
        return teardown(tr, ctx, status).await;
    }

    let (drained, failed) = runner_progress(tr, ctx).await?;
    if drained < tr.spec.parallelism as usize {
        debug!(test_run = %name, drained, "runners still executing");
        return Ok(Action::requeue(FINISH_POLL_WAIT));
    }
    if failed > 0 {
        let detail = format!("{failed} runner pod(s) failed");
        error!(test_run = %name, "{detail}");
        send_error_event(tr, ctx, ErrorCode::K6OperatorRunnerError, &detail, true).await;
    }

    info!(test_run = %name, "all runners finished");
    finish(tr, ctx, status).await
}

/// Count runner jobs with no active pods left, and failed pods
async fn runner_progress(tr: &TestRun, ctx: &Context) -> Result<(usize, i32)> {
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    let list = api
        .list(&ListParams::default().labels(&jobs::runner_selector(&tr.name_any())))
        .await?;
    Ok(job_progress(&list.items))
}

fn job_progress(items: &[Job]) -> (usize, i32) {
    let mut drained = 0;
    let mut failed = 0;
    for job in items {
        let Some(status) = job.status.as_ref() else {
            continue;
        };
        if status.active.unwrap_or(0) == 0 {
            drained += 1;
        }
        failed += status.failed.unwrap_or(0);
    }
    (drained, failed)
}

/// Run `teardown()` once all segments have stopped on their own
///
/// A settling period after the last running-state transition gives the
/// runners time to flush; teardown failures are logged but never block
/// the run from finishing.
async fn teardown(tr: &TestRun, ctx: &Context, mut status: TestRunStatus) -> Result<Action> {
    let name = tr.name_any();

    let since = conditions::last_update(&status.conditions, ConditionType::TestRunRunning)
        .map(|t| {
            Utc::now()
                .signed_duration_since(t)
                .to_std()
                .unwrap_or_default()
        })
        .unwrap_or_default();
    if since < ctx.config.teardown_wait {
        return Ok(Action::requeue(FINISH_POLL_WAIT));
    }

    if !stop::stopped_jobs(tr, ctx).await? {
        debug!(test_run = %name, "waiting for runners to stop before teardown");
        return Ok(Action::requeue(FINISH_POLL_WAIT));
    }

    match hostnames(ctx, tr, false).await? {
        Some(hosts) if !hosts.is_empty() => {
            if let Err(e) = ctx.runner_api.run_teardown(&hosts).await {
                error!(test_run = %name, error = %e, "teardown failed");
            }
        }
        _ => error!(test_run = %name, "no responsive runner left to execute teardown"),
    }

    conditions::update_condition(
        &mut status.conditions,
        ConditionType::TeardownExecuted,
        ConditionStatus::True,
    );
    persist(ctx, tr, &status).await?;
    info!(test_run = %name, "teardown executed");

    finish(tr, ctx, status).await
}

/// Record that the run stopped executing
async fn finish(tr: &TestRun, ctx: &Context, mut status: TestRunStatus) -> Result<Action> {
    conditions::update_condition(
        &mut status.conditions,
        ConditionType::TestRunRunning,
        ConditionStatus::False,
    );
    status.stage = Stage::Stopped;
    persist(ctx, tr, &status).await?;
    Ok(Action::requeue(POLL_WAIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;

    fn job(active: i32, failed: i32) -> Job {
        Job {
            status: Some(JobStatus {
                active: Some(active),
                failed: Some(failed),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn drained_jobs_have_no_active_pods() {
        let jobs = vec![job(0, 0), job(1, 0), job(0, 2)];
        assert_eq!(job_progress(&jobs), (2, 2));
    }

    #[test]
    fn jobs_without_status_are_skipped() {
        let jobs = vec![Job::default(), job(0, 0)];
        assert_eq!(job_progress(&jobs), (1, 0));
    }
}
