//! PrivateLoadZone reconciler
//!
//! The resource's lifecycle is anchored on two markers: the finalizer,
//! which records that the zone was registered with the backend, and the
//! in-memory worker, which does the actual polling. Reconciles converge
//! the two with whatever state the resource is observed in.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::json;
use surge_common::crd::{PrivateLoadZone, PLZ_FINALIZER, PLZ_UID_ANNOTATION};
use surge_common::kube_utils::{load_token_by_name, update_status};
use surge_common::{Error, Result};
use tracing::{error, info, warn};

use crate::registry::WorkerRegistry;
use crate::worker::PlzWorker;

const TOKEN_WAIT: Duration = Duration::from_secs(5);
const RESYNC_WAIT: Duration = Duration::from_secs(1);

/// Shared state for the PrivateLoadZone controller
pub struct PlzContext {
    pub client: Client,
    pub registry: WorkerRegistry,
    pub api_url: String,
}

impl PlzContext {
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            registry: WorkerRegistry::new(),
            api_url: api_url.into(),
        }
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

pub async fn reconcile(plz: Arc<PrivateLoadZone>, ctx: Arc<PlzContext>) -> Result<Action> {
    let name = plz.name_any();
    let worker = ctx.registry.get(&name).await.ok();

    if plz.metadata.deletion_timestamp.is_some() {
        return teardown(&plz, &ctx, worker).await;
    }

    let registered = plz
        .status
        .as_ref()
        .map(|s| s.is_registered())
        .unwrap_or(false);
    let has_finalizer = plz.finalizers().contains(&PLZ_FINALIZER.to_string());

    if !registered {
        if has_finalizer {
            // registration happened, the status write was lost
            return resync(&plz, &ctx).await;
        }
        return register(&plz, &ctx).await;
    }

    match worker {
        // registered but the worker is gone, e.g. after an operator restart
        None => reconstruct(&plz, &ctx).await,
        Some(worker) => {
            worker.start_factory().await;
            Ok(Action::await_change())
        }
    }
}

pub fn error_policy(plz: Arc<PrivateLoadZone>, err: &Error, _ctx: Arc<PlzContext>) -> Action {
    error!(zone = %plz.name_any(), error = %err, "load zone reconciliation failed");
    if err.is_retryable() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::await_change()
    }
}

// ============================================================================
// Lifecycle branches
// ============================================================================

/// First contact: register the zone with the backend and mark the resource
async fn register(plz: &PrivateLoadZone, ctx: &PlzContext) -> Result<Action> {
    let name = plz.name_any();

    let Some(worker) = build_worker(plz, ctx).await? else {
        return Ok(Action::requeue(TOKEN_WAIT));
    };

    let uid = worker.register().await?;

    if let Err(e) = ctx.registry.add(&name, worker).await {
        // another reconcile of the same zone won the race
        warn!(zone = %name, error = %e, "worker already registered, backing off");
        return Ok(Action::await_change());
    }

    let api: Api<PrivateLoadZone> = Api::namespaced(ctx.client.clone(), &namespace(plz));
    let mut finalizers = plz.finalizers().to_vec();
    finalizers.push(PLZ_FINALIZER.to_string());
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "annotations": { PLZ_UID_ANNOTATION: uid },
        }
    });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    info!(zone = %name, "load zone registered, awaiting status sync");
    Ok(Action::requeue(RESYNC_WAIT))
}

/// The finalizer says we registered; make the status say it too
async fn resync(plz: &PrivateLoadZone, ctx: &PlzContext) -> Result<Action> {
    let name = plz.name_any();
    let mut status = plz.status.clone().unwrap_or_default();
    status.set_registered(true);

    let api: Api<PrivateLoadZone> = Api::namespaced(ctx.client.clone(), &namespace(plz));
    update_status(&api, &name, &status).await?;

    Ok(Action::requeue(RESYNC_WAIT))
}

/// Rebuild the in-memory worker for a zone that is already registered
async fn reconstruct(plz: &PrivateLoadZone, ctx: &PlzContext) -> Result<Action> {
    let name = plz.name_any();

    let Some(worker) = build_worker(plz, ctx).await? else {
        return Ok(Action::requeue(TOKEN_WAIT));
    };

    if let Err(e) = ctx.registry.add(&name, worker).await {
        warn!(zone = %name, error = %e, "worker already reconstructed, backing off");
        return Ok(Action::await_change());
    }

    info!(zone = %name, "reconstructed worker for registered load zone");
    Ok(Action::requeue(RESYNC_WAIT))
}

/// Deletion: stop the worker, deregister and release the finalizer
async fn teardown(
    plz: &PrivateLoadZone,
    ctx: &PlzContext,
    worker: Option<Arc<PlzWorker>>,
) -> Result<Action> {
    let name = plz.name_any();

    if !plz.finalizers().contains(&PLZ_FINALIZER.to_string()) {
        return Ok(Action::await_change());
    }

    if let Some(worker) = worker {
        worker.stop_factory().await;
        worker.deregister().await;
    } else {
        warn!(zone = %name, "deleting a zone without a live worker, skipping deregistration");
    }

    let api: Api<PrivateLoadZone> = Api::namespaced(ctx.client.clone(), &namespace(plz));
    let finalizers = without_finalizer(plz.finalizers());
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    ctx.registry.delete(&name).await;
    info!(zone = %name, "load zone torn down");
    Ok(Action::await_change())
}

// ============================================================================
// Helpers
// ============================================================================

/// Build a worker once the zone's token secret is readable
///
/// `Ok(None)` means the secret hasn't appeared yet; the caller requeues.
async fn build_worker(plz: &PrivateLoadZone, ctx: &PlzContext) -> Result<Option<Arc<PlzWorker>>> {
    let name = plz.name_any();
    let ns = namespace(plz);

    let token = match load_token_by_name(&ctx.client, &ns, &plz.spec.token).await? {
        Some(token) => token,
        None => {
            info!(zone = %name, secret = %plz.spec.token, "token secret not found yet, waiting");
            return Ok(None);
        }
    };

    let worker = PlzWorker::new(plz, &token, ctx.client.clone(), &ctx.api_url)?;
    Ok(Some(Arc::new(worker)))
}

fn namespace(plz: &PrivateLoadZone) -> String {
    plz.namespace().unwrap_or_else(|| "default".to_string())
}

fn without_finalizer(finalizers: &[String]) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != PLZ_FINALIZER)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_removal_is_targeted() {
        let finalizers = vec![
            "other.io/finalizer".to_string(),
            PLZ_FINALIZER.to_string(),
        ];
        let remaining = without_finalizer(&finalizers);
        assert_eq!(remaining, vec!["other.io/finalizer".to_string()]);
    }

    #[test]
    fn finalizer_removal_on_empty_list() {
        assert!(without_finalizer(&[]).is_empty());
    }
}
