//! Pending and initialization stages
//!
//! `initialize` validates the spec, seeds the conditions and launches
//! the initializer job. `inspect` waits for that job, reads the
//! execution requirements from its logs and decides the run's type:
//! plain, cloud, or cloud via a private load zone. Cloud runs are
//! created on the backend here, before any runner exists.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use surge_cloud::{aggregation, CreateTestRunRequest, ErrorCode, InspectOutput};
use surge_common::crd::{conditions, ConditionStatus, ConditionType, Stage, TestRun};
use surge_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::{cli, jobs};

use super::{fail, namespace, persist, send_error_event, Context, POLL_WAIT};

const INITIALIZER_WAIT: Duration = Duration::from_secs(5);
const LOG_READ_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Pending
// ============================================================================

pub(super) async fn initialize(tr: &TestRun, ctx: &Context) -> Result<Action> {
    let name = tr.name_any();
    info!(test_run = %name, "initializing test run");

    if let Err(e) = tr.spec.script.validate() {
        return fail(tr, ctx, &e).await;
    }
    let cli = match cli::parse(tr.spec.arguments.as_deref().unwrap_or("")) {
        Ok(cli) => cli,
        Err(e) => return fail(tr, ctx, &e).await,
    };

    // conditions first, then the stage: a lost write between the two
    // leaves the run re-enterable
    let mut status = tr.status.clone().unwrap_or_default();
    status.initialize(&tr.spec);
    persist(ctx, tr, &status).await?;

    status.stage = Stage::Initialization;
    persist(ctx, tr, &status).await?;

    let job = jobs::initializer_job(tr, &cli.archive_args)?;
    let api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    match api.create(&PostParams::default(), &job).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            debug!(test_run = %name, "initializer job already exists");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Action::requeue(INITIALIZER_WAIT))
}

// ============================================================================
// Initialization
// ============================================================================

pub(super) async fn inspect(tr: &TestRun, ctx: &Context) -> Result<Action> {
    let name = tr.name_any();

    let output = match inspect_test_run(tr, ctx).await {
        Ok(Some(output)) => output,
        Ok(None) => {
            report_if_stuck(tr, ctx, "initializer pod").await;
            return Ok(Action::requeue(INITIALIZER_WAIT));
        }
        Err(e) if !e.is_retryable() => return fail(tr, ctx, &e).await,
        Err(e) => return Err(e),
    };

    if (tr.spec.parallelism as u64) > output.max_vus {
        let e = Error::configuration_for(
            &name,
            format!(
                "parallelism {} exceeds the script's maxVUs {}",
                tr.spec.parallelism, output.max_vus
            ),
        );
        return fail(tr, ctx, &e).await;
    }

    let cli = cli::parse(tr.spec.arguments.as_deref().unwrap_or(""))?;

    let mut status = tr.status.clone().unwrap_or_default();
    if cli.has_cloud_out {
        conditions::update_condition(
            &mut status.conditions,
            ConditionType::CloudTestRun,
            ConditionStatus::True,
        );
        if conditions::is_unknown(&status.conditions, ConditionType::CloudTestRunCreated) {
            conditions::update_condition(
                &mut status.conditions,
                ConditionType::CloudTestRunCreated,
                ConditionStatus::False,
            );
        }
        conditions::update_condition(
            &mut status.conditions,
            ConditionType::CloudTestRunFinalized,
            ConditionStatus::False,
        );
    } else {
        conditions::update_condition(
            &mut status.conditions,
            ConditionType::CloudTestRun,
            ConditionStatus::False,
        );
    }

    if status.is_cloud()
        && conditions::is_false(&status.conditions, ConditionType::CloudTestRunCreated)
    {
        return setup_cloud_test(tr, ctx, status, &output).await;
    }

    info!(test_run = %name, max_vus = output.max_vus, "script validated");
    status.stage = Stage::Initialized;
    persist(ctx, tr, &status).await?;
    Ok(Action::requeue(POLL_WAIT))
}

/// Read the execution requirements from the initializer pod
///
/// `Ok(None)` while the pod hasn't succeeded yet. A failed pod or
/// unparseable output is a hard error: re-running the same script
/// yields the same result.
async fn inspect_test_run(tr: &TestRun, ctx: &Context) -> Result<Option<InspectOutput>> {
    let name = tr.name_any();
    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    let list = pods
        .list(&ListParams::default().labels(&jobs::initializer_selector(&name)))
        .await?;

    let Some(pod) = list.items.first() else {
        return Ok(None);
    };
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Succeeded") => {}
        Some("Failed") => {
            return Err(Error::configuration_for(
                &name,
                "the initializer job has failed: check the script and arguments",
            ));
        }
        _ => return Ok(None),
    }

    let pod_name = pod.name_any();
    let params = LogParams {
        container: Some("k6".to_string()),
        ..Default::default()
    };
    let logs = tokio::time::timeout(LOG_READ_TIMEOUT, pods.logs(&pod_name, &params))
        .await
        .map_err(|_| {
            Error::internal_with_context("initializer", "timed out reading the initializer logs")
        })??;

    let output: InspectOutput = serde_json::from_str(&logs).map_err(|e| {
        warn!(test_run = %name, output = %logs, "initializer produced unexpected output");
        Error::serialization(format!("initializer output is not valid JSON: {e}"))
    })?;
    Ok(Some(output))
}

/// Create the backend run and record its identity
async fn setup_cloud_test(
    tr: &TestRun,
    ctx: &Context,
    mut status: surge_common::crd::TestRunStatus,
    output: &InspectOutput,
) -> Result<Action> {
    let name = tr.name_any();
    let Some(cloud) = ctx.cloud_client(tr).await? else {
        debug!(test_run = %name, "cloud token not available yet");
        return Ok(Action::requeue(POLL_WAIT));
    };

    let request = CreateTestRunRequest {
        name: output.test_name().to_string(),
        project_id: output.project_id(),
        vus: output.max_vus as i64,
        thresholds: output.thresholds.clone(),
        duration: output.duration_seconds(),
        process_thresholds: true,
        instances: tr.spec.parallelism,
    };
    let response = cloud.create_test_run(&request).await?;
    info!(test_run = %name, test_run_id = %response.reference_id, "cloud run created");

    status.test_run_id = Some(response.reference_id);
    if let Some(config) = &response.config_override {
        status.aggregation_vars = Some(aggregation::encode(config));
    }
    conditions::update_condition(
        &mut status.conditions,
        ConditionType::CloudTestRunCreated,
        ConditionStatus::True,
    );
    status.stage = Stage::Initialized;
    persist(ctx, tr, &status).await?;
    Ok(Action::requeue(POLL_WAIT))
}

/// Raise an error event once pods take suspiciously long to come up
pub(super) async fn report_if_stuck(tr: &TestRun, ctx: &Context, what: &str) {
    let status = tr.status.clone().unwrap_or_default();
    let Some(since) = conditions::last_update(&status.conditions, ConditionType::TestRunRunning)
    else {
        return;
    };
    let elapsed = Utc::now()
        .signed_duration_since(since)
        .to_std()
        .unwrap_or_default();
    if elapsed < ctx.config.stuck_pod_timeout {
        return;
    }

    let detail = format!(
        "Creation of {what} takes too long: your configuration might be off. \
         Check if the resources were created successfully."
    );
    warn!(test_run = %tr.name_any(), "{detail}");
    send_error_event(tr, ctx, ErrorCode::K6OperatorStartError, &detail, true).await;
}
