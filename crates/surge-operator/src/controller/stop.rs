//! Aborting and finalizing a run
//!
//! `stop_jobs` handles a backend-requested abort: a stop job halts the
//! runners mid-flight. `finalize` runs in the stopped stage for every
//! run and, for cloud runs, marks the backend run finished.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use surge_common::crd::{conditions, ConditionStatus, ConditionType, Stage, TestRun, TestRunStatus};
use surge_common::Result;
use tracing::{debug, error, info, warn};

use crate::jobs;

use super::{hostnames, namespace, persist, service_names, Context, POLL_WAIT, RETRY_WAIT};

const FINALIZE_GRACE: Duration = Duration::from_secs(5);
const FINALIZE_WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Abort
// ============================================================================

/// Stop a run the backend wants aborted
pub(super) async fn stop_jobs(tr: &TestRun, ctx: &Context) -> Result<Action> {
    let name = tr.name_any();
    info!(test_run = %name, "stopping test run");

    let hosts = hostnames(ctx, tr, false).await?.unwrap_or_default();
    if !hosts.is_empty() {
        let job = jobs::stop_job(tr, &hosts);
        let api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace(tr));
        match api.create(&PostParams::default(), &job).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(test_run = %name, "stop job already exists");
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        warn!(test_run = %name, "no responsive runner to stop, skipping straight to finalization");
    }

    persist(ctx, tr, &aborted_status(tr)).await?;
    Ok(Action::requeue(POLL_WAIT))
}

/// Status proposal recording a completed abort
///
/// Overlapping reconciles each build this; [`TestRunStatus::set_if_newer`]
/// collapses their proposals into one status on the API server.
fn aborted_status(tr: &TestRun) -> TestRunStatus {
    let mut status = tr.status.clone().unwrap_or_default();
    status.stage = Stage::Stopped;
    conditions::update_condition(
        &mut status.conditions,
        ConditionType::TestRunRunning,
        ConditionStatus::False,
    );
    conditions::update_condition(
        &mut status.conditions,
        ConditionType::CloudTestRunAborted,
        ConditionStatus::True,
    );
    status
}

/// Whether every runner reports it is no longer executing
pub(super) async fn stopped_jobs(tr: &TestRun, ctx: &Context) -> Result<bool> {
    for host in service_names(ctx, tr).await? {
        if ctx.runner_api.is_job_running(&host).await {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Force-delete runner jobs that refuse to stop
async fn kill_jobs(tr: &TestRun, ctx: &Context) -> Result<()> {
    let name = tr.name_any();
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    let list = api
        .list(&ListParams::default().labels(&jobs::runner_selector(&name)))
        .await?;

    let params = DeleteParams::background();
    for job in list.items {
        let job_name = job.name_any();
        match api.delete(&job_name, &params).await {
            Ok(_) => debug!(test_run = %name, job = %job_name, "runner job deleted"),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ============================================================================
// Stopped stage
// ============================================================================

pub(super) async fn finalize(tr: &TestRun, ctx: &Context) -> Result<Action> {
    let name = tr.name_any();
    let mut status = tr.status.clone().unwrap_or_default();

    // an aborted load-zone run may still have runners ignoring the stop
    // call; they get deleted outright
    if status.is_plz()
        && conditions::is_true(&status.conditions, ConditionType::CloudTestRunAborted)
        && !stopped_jobs(tr, ctx).await?
    {
        kill_jobs(tr, ctx).await?;
        return Ok(Action::requeue(FINALIZE_WAIT));
    }

    if status.is_cloud()
        && conditions::is_false(&status.conditions, ConditionType::CloudTestRunFinalized)
    {
        // short grace so the runners can flush their last metrics
        let since = conditions::last_update(&status.conditions, ConditionType::TestRunRunning)
            .map(|t| {
                Utc::now()
                    .signed_duration_since(t)
                    .to_std()
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        if since < FINALIZE_GRACE {
            return Ok(Action::requeue(FINALIZE_WAIT));
        }

        let Some(cloud) = ctx.cloud_client(tr).await? else {
            return Ok(Action::requeue(FINALIZE_WAIT));
        };
        let id = status.test_run_id.clone().unwrap_or_default();
        if let Err(e) = cloud.finish_test_run(&id).await {
            error!(test_run = %name, test_run_id = %id, error = %e, "could not finalize the cloud run");
            return Ok(Action::requeue(RETRY_WAIT));
        }
        conditions::update_condition(
            &mut status.conditions,
            ConditionType::CloudTestRunFinalized,
            ConditionStatus::True,
        );
        info!(test_run = %name, test_run_id = %id, "cloud run finalized");
    }

    status.stage = Stage::Finished;
    persist(ctx, tr, &status).await?;
    info!(test_run = %name, "test run finished");
    Ok(Action::requeue(POLL_WAIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_fixtures::sample_test_run;

    /// An abort observed mid-run must propose the full stopped record
    #[test]
    fn abort_composes_the_stopped_status() {
        let mut tr = sample_test_run();
        let mut running = TestRunStatus {
            stage: Stage::Started,
            ..Default::default()
        };
        conditions::update_condition(
            &mut running.conditions,
            ConditionType::TestRunRunning,
            ConditionStatus::True,
        );
        tr.status = Some(running);

        let status = aborted_status(&tr);
        assert_eq!(status.stage, Stage::Stopped);
        assert!(conditions::is_false(
            &status.conditions,
            ConditionType::TestRunRunning
        ));
        assert!(conditions::is_true(
            &status.conditions,
            ConditionType::CloudTestRunAborted
        ));
    }

    /// A second reconcile observing the same abort proposes the same
    /// record, so the merged result cannot flip back
    #[test]
    fn abort_proposal_is_stable_across_reconciles() {
        let mut tr = sample_test_run();
        tr.status = Some(aborted_status(&tr));

        let again = aborted_status(&tr);
        assert_eq!(again.stage, Stage::Stopped);
        assert!(conditions::is_true(
            &again.conditions,
            ConditionType::CloudTestRunAborted
        ));
    }
}
