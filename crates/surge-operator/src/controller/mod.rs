//! TestRun reconciler
//!
//! Drives a run through its stage machine. Every reconcile observes the
//! current stage and either advances it, requeues to poll the cluster,
//! or parks until the resource changes. Cloud-bound runs additionally
//! poll the backend for an abort request before any stage work.

mod create;
mod finish;
mod init;
mod start;
mod stop;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use surge_cloud::{CloudClient, ErrorCode, Events};
use surge_common::crd::{conditions, Cleanup, ConditionType, Stage, TestRun, TestRunStatus};
use surge_common::kube_utils::{load_token_by_label, load_token_by_name, update_status};
use surge_common::{Error, Result};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::jobs;
use crate::runner_api::RunnerApi;

const RETRY_WAIT: Duration = Duration::from_secs(15);
const POLL_WAIT: Duration = Duration::from_secs(1);

/// Shared state for the TestRun controller
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub runner_api: RunnerApi,
    cloud: Mutex<Option<Arc<CloudClient>>>,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig) -> Result<Self> {
        Ok(Self {
            client,
            config,
            runner_api: RunnerApi::new()?,
            cloud: Mutex::new(None),
        })
    }

    /// Cloud client for a run, built lazily and cached
    ///
    /// `Ok(None)` means the run's token secret hasn't appeared yet;
    /// the caller requeues. A run can point the client at a different
    /// backend via a `K6_CLOUD_HOST` runner variable.
    pub(crate) async fn cloud_client(&self, tr: &TestRun) -> Result<Option<Arc<CloudClient>>> {
        let mut cached = self.cloud.lock().await;
        if let Some(client) = cached.as_ref() {
            return Ok(Some(Arc::clone(client)));
        }

        let token = match &tr.spec.token {
            Some(secret) => {
                match load_token_by_name(&self.client, &namespace(tr), secret).await? {
                    Some(token) => token,
                    None => return Ok(None),
                }
            }
            None => load_token_by_label(&self.client).await?,
        };

        let host = tr
            .spec
            .runner
            .as_ref()
            .and_then(|r| r.env.iter().find(|e| e.name == "K6_CLOUD_HOST"))
            .and_then(|e| e.value.clone())
            .unwrap_or_else(|| self.config.cloud_host.clone());

        let client = Arc::new(CloudClient::new(host, token)?);
        *cached = Some(Arc::clone(&client));
        Ok(Some(client))
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

pub async fn reconcile(tr: Arc<TestRun>, ctx: Arc<Context>) -> Result<Action> {
    let name = tr.name_any();
    let status = tr.status.clone().unwrap_or_default();
    debug!(test_run = %name, stage = %status.stage, "reconciling test run");

    // a cloud run can be aborted from the backend at any point until the
    // abort is recorded
    if status.is_cloud()
        && conditions::is_false(&status.conditions, ConditionType::CloudTestRunAborted)
        && should_abort(&tr, &ctx, &status).await?
    {
        info!(test_run = %name, "backend requested an abort");
        return stop::stop_jobs(&tr, &ctx).await;
    }

    match status.stage {
        Stage::Pending => init::initialize(&tr, &ctx).await,
        Stage::Initialization => init::inspect(&tr, &ctx).await,
        Stage::Initialized => create::create_jobs(&tr, &ctx).await,
        Stage::Created => start::start_jobs(&tr, &ctx).await,
        Stage::Started => finish::wait_for_finish(&tr, &ctx).await,
        Stage::Stopped => stop::finalize(&tr, &ctx).await,
        Stage::Finished | Stage::Error => cleanup(&tr, &ctx).await,
    }
}

pub fn error_policy(tr: Arc<TestRun>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(test_run = %tr.name_any(), error = %err, "test run reconciliation failed");
    if err.is_retryable() {
        Action::requeue(RETRY_WAIT)
    } else {
        Action::await_change()
    }
}

/// Whether the backend wants this run stopped
async fn should_abort(tr: &TestRun, ctx: &Context, status: &TestRunStatus) -> Result<bool> {
    let Some(id) = status.test_run_id.as_deref().filter(|id| !id.is_empty()) else {
        return Ok(false);
    };
    let Some(cloud) = ctx.cloud_client(tr).await? else {
        return Ok(false);
    };
    match cloud.get_test_run_state(id).await {
        Ok(state) => Ok(state.aborted()),
        Err(e) => {
            // polling failures must not stall the run
            warn!(test_run_id = id, error = %e, "could not poll the backend run state");
            Ok(false)
        }
    }
}

/// Terminal stages: optionally delete the resource itself
async fn cleanup(tr: &TestRun, ctx: &Context) -> Result<Action> {
    if tr.spec.cleanup != Some(Cleanup::Post) {
        return Ok(Action::await_change());
    }

    let name = tr.name_any();
    info!(test_run = %name, "removing finished test run");
    let api = testrun_api(ctx, tr);
    if let Err(e) = api.delete(&name, &DeleteParams::default()).await {
        // best-effort; the subordinate jobs go down with the owner anyway
        warn!(test_run = %name, error = %e, "could not delete finished test run");
    }
    Ok(Action::await_change())
}

// ============================================================================
// Shared helpers
// ============================================================================

pub(crate) fn namespace(tr: &TestRun) -> String {
    tr.namespace().unwrap_or_else(|| "default".to_string())
}

pub(crate) fn testrun_api(ctx: &Context, tr: &TestRun) -> Api<TestRun> {
    Api::namespaced(ctx.client.clone(), &namespace(tr))
}

/// Persist a proposed status snapshot
pub(crate) async fn persist(ctx: &Context, tr: &TestRun, status: &TestRunStatus) -> Result<()> {
    update_status(&testrun_api(ctx, tr), &tr.name_any(), status).await?;
    Ok(())
}

/// Names of the runner services of a run
pub(crate) async fn service_names(ctx: &Context, tr: &TestRun) -> Result<Vec<String>> {
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    let list = services
        .list(&ListParams::default().labels(&jobs::runner_selector(&tr.name_any())))
        .await?;
    Ok(list.items.iter().map(|s| s.name_any()).collect())
}

/// Runner hostnames, gated on API readiness
///
/// With `all_ready` every runner must answer its status endpoint;
/// `Ok(None)` means at least one doesn't yet. Without it, unreachable
/// runners are simply left out — teardown and stop calls should reach
/// whoever is still alive.
pub(crate) async fn hostnames(
    ctx: &Context,
    tr: &TestRun,
    all_ready: bool,
) -> Result<Option<Vec<String>>> {
    let names = service_names(ctx, tr).await?;
    let mut ready = Vec::with_capacity(names.len());
    for name in names {
        if ctx.runner_api.is_service_ready(&name).await {
            ready.push(name);
        } else if all_ready {
            debug!(service = %name, "runner service is not ready yet");
            return Ok(None);
        }
    }
    Ok(Some(ready))
}

/// Post an error event for a cloud run, best-effort
pub(crate) async fn send_error_event(
    tr: &TestRun,
    ctx: &Context,
    code: ErrorCode,
    detail: &str,
    abort: bool,
) {
    let status = tr.status.clone().unwrap_or_default();
    if !status.is_cloud() {
        return;
    }
    let Some(id) = status.test_run_id.as_deref().filter(|id| !id.is_empty()) else {
        return;
    };

    let mut events = Events::error(code).with_detail(detail);
    if abort {
        events = events.with_abort();
    }
    match ctx.cloud_client(tr).await {
        Ok(Some(cloud)) => cloud.send_test_run_events(id, events).await,
        Ok(None) => warn!(test_run_id = id, "no cloud token yet, dropping error event"),
        Err(e) => warn!(test_run_id = id, error = %e, "could not reach the backend for an error event"),
    }
}

/// Drive a run into the terminal error stage
///
/// Used for configuration-class failures where requeueing cannot help.
/// Cloud runs get an abort event so the backend stops billing the run.
pub(crate) async fn fail(tr: &TestRun, ctx: &Context, err: &Error) -> Result<Action> {
    let name = tr.name_any();
    error!(test_run = %name, error = %err, "test run failed");

    send_error_event(
        tr,
        ctx,
        ErrorCode::K6OperatorAbortError,
        &err.to_string(),
        true,
    )
    .await;

    let mut status = tr.status.clone().unwrap_or_default();
    status.stage = Stage::Error;
    persist(ctx, tr, &status).await?;
    Ok(Action::await_change())
}
