//! Initialized stage: create the runner jobs and services

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use surge_cloud::ErrorCode;
use surge_common::crd::{conditions, ConditionType, Stage, TestRun};
use surge_common::kube_utils::{load_token_by_label, load_token_by_name};
use surge_common::{Error, Result};
use tracing::{debug, info};

use crate::jobs;

use super::{fail, namespace, persist, send_error_event, Context, POLL_WAIT};

const TOKEN_WAIT: Duration = Duration::from_secs(5);
const DUPLICATE_GRACE: Duration = Duration::from_secs(30);
const DUPLICATE_WAIT: Duration = Duration::from_secs(10);

pub(super) async fn create_jobs(tr: &TestRun, ctx: &Context) -> Result<Action> {
    let name = tr.name_any();
    let status = tr.status.clone().unwrap_or_default();

    let token = if status.is_cloud() {
        match load_cloud_token(tr, ctx).await? {
            Some(token) => Some(token),
            None => {
                debug!(test_run = %name, "cloud token secret not found yet");
                return Ok(Action::requeue(TOKEN_WAIT));
            }
        }
    } else {
        None
    };

    // a leftover first runner means another run already claimed this
    // name, unless it is our own creation racing the status write
    let jobs_api: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace(tr));
    if jobs_api.get_opt(&format!("{name}-1")).await?.is_some() {
        let recently_typed =
            conditions::last_update(&status.conditions, ConditionType::CloudTestRun)
                .map(|t| {
                    Utc::now()
                        .signed_duration_since(t)
                        .to_std()
                        .unwrap_or_default()
                        < DUPLICATE_GRACE
                })
                .unwrap_or(false);
        if conditions::is_unknown(&status.conditions, ConditionType::CloudTestRunCreated)
            || recently_typed
        {
            return Ok(Action::requeue(DUPLICATE_WAIT));
        }
        let e = Error::configuration_for(
            &name,
            "runner jobs for this test run already exist: delete them or rename the run",
        );
        return fail(tr, ctx, &e).await;
    }

    if let Err(e) = launch(tr, ctx, token.as_deref()).await {
        send_error_event(
            tr,
            ctx,
            ErrorCode::K6OperatorStartError,
            &format!("could not create runner resources: {e}"),
            true,
        )
        .await;
        return Err(e);
    }

    info!(test_run = %name, parallelism = tr.spec.parallelism, "runner jobs created");
    let mut status = status;
    status.stage = Stage::Created;
    persist(ctx, tr, &status).await?;
    Ok(Action::requeue(POLL_WAIT))
}

/// Create one job and one service per runner; 409s mean a previous
/// reconcile got there first
async fn launch(tr: &TestRun, ctx: &Context, token: Option<&str>) -> Result<()> {
    let ns = namespace(tr);
    let jobs_api: Api<Job> = Api::namespaced(ctx.client.clone(), &ns);
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);

    for index in 1..=tr.spec.parallelism {
        let job = jobs::runner_job(tr, index, token)?;
        match jobs_api.create(&PostParams::default(), &job).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
            Err(e) => return Err(e.into()),
        }

        let service = jobs::runner_service(tr, index);
        match services.create(&PostParams::default(), &service).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 409 => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn load_cloud_token(tr: &TestRun, ctx: &Context) -> Result<Option<String>> {
    match &tr.spec.token {
        Some(secret) => load_token_by_name(&ctx.client, &namespace(tr), secret).await,
        None => load_token_by_label(&ctx.client).await.map(Some),
    }
}
