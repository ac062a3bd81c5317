//! surge operator binary
//!
//! Installs the CRDs, then runs the TestRun and PrivateLoadZone
//! controllers side by side until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use surge_common::crd::{PrivateLoadZone, TestRun};
use surge_common::telemetry::init_telemetry;
use surge_operator::{error_policy, reconcile, Context, OperatorConfig};
use surge_plz::PlzContext;

// watches re-list on this cadence so dropped events cannot wedge a run
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Kubernetes operator for distributed k6 load tests
#[derive(Parser, Debug)]
#[command(name = "surge-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.crd {
        print!("{}", serde_yaml::to_string(&TestRun::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&PrivateLoadZone::crd())?);
        return Ok(());
    }

    init_telemetry().map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    tracing::info!("surge operator starting");

    let config = OperatorConfig::from_env();
    let client = Client::try_default().await?;

    ensure_crds_installed(&client).await?;

    let (test_runs, zones): (Api<TestRun>, Api<PrivateLoadZone>) = match &config.watch_namespace {
        Some(ns) => {
            tracing::info!(namespace = %ns, "watching a single namespace");
            (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
            )
        }
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let plz_ctx = Arc::new(PlzContext::new(client.clone(), config.cloud_host.clone()));
    let ctx = Arc::new(Context::new(client, config)?);

    let watcher = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    let test_run_controller = Controller::new(test_runs, watcher.clone())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(obj) => tracing::debug!(?obj, "test run reconciled"),
                Err(e) => tracing::error!(error = ?e, "test run reconciliation error"),
            }
        });

    let zone_controller = Controller::new(zones, watcher)
        .shutdown_on_signal()
        .run(
            surge_plz::controller::reconcile,
            surge_plz::controller::error_policy,
            plz_ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok(obj) => tracing::debug!(?obj, "load zone reconciled"),
                Err(e) => tracing::error!(error = ?e, "load zone reconciliation error"),
            }
        });

    tokio::select! {
        _ = test_run_controller => tracing::info!("test run controller completed"),
        _ = zone_controller => tracing::info!("load zone controller completed"),
    }

    tracing::info!("surge operator shutting down");
    Ok(())
}

/// Install or update the CRDs with server-side apply
///
/// The operator owns its CRDs, so their schemas always match the
/// running version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("surge-operator").force();

    for (name, crd) in [
        ("testruns.k6.io", TestRun::crd()),
        ("privateloadzones.k6.io", PrivateLoadZone::crd()),
    ] {
        tracing::info!(crd = name, "installing CRD");
        crds.patch(name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {name}: {e}"))?;
    }
    Ok(())
}
