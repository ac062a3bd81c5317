//! Shared Kubernetes utilities using kube-rs
//!
//! The optimistic status updater and cloud-token secret loading, shared
//! by the TestRun and PrivateLoadZone controllers.

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::object::HasStatus;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::crd::{PrivateLoadZoneStatus, TestRunStatus};
use crate::error::Error;
use crate::{Result, SYSTEM_NAMESPACE, TOKEN_LABEL, TOKEN_SECRET_KEY};

// =============================================================================
// Optimistic status updates
// =============================================================================

/// Statuses that can absorb a concurrently-proposed snapshot
///
/// `merge_newer` applies the parts of `proposed` that are newer than
/// what is already recorded and reports whether anything was accepted.
pub trait MergeStatus: Default + Clone + Serialize {
    /// Merge `proposed` into self, returning whether anything changed
    fn merge_newer(&mut self, proposed: &Self) -> bool;
}

impl MergeStatus for TestRunStatus {
    fn merge_newer(&mut self, proposed: &Self) -> bool {
        self.set_if_newer(proposed)
    }
}

impl MergeStatus for PrivateLoadZoneStatus {
    fn merge_newer(&mut self, proposed: &Self) -> bool {
        self.set_if_newer(proposed)
    }
}

/// Persist a proposed status without clobbering concurrent writers
///
/// Re-fetches the resource, merges the proposal into the live status and
/// merge-patches the result. A resource deleted in the meantime is not
/// an error. Returns whether the proposal (or part of it) was accepted;
/// a conflicting write simply loses and relies on the next reconcile.
pub async fn update_status<K>(api: &Api<K>, name: &str, proposed: &K::Status) -> Result<bool>
where
    K: kube::Resource + HasStatus + Clone + DeserializeOwned + std::fmt::Debug,
    K::Status: MergeStatus,
{
    let mut latest = match api.get(name).await {
        Ok(resource) => resource,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(name, "resource is gone, nothing to update");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let status = latest.status_mut().get_or_insert_with(K::Status::default);
    if !status.merge_newer(proposed) {
        debug!(name, "proposed status is not newer, skipping update");
        return Ok(false);
    }

    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(true)
}

// =============================================================================
// Cloud token secrets
// =============================================================================

fn token_from_secret(secret: &Secret) -> Result<String> {
    let name = secret.metadata.name.as_deref().unwrap_or("<unnamed>");
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(TOKEN_SECRET_KEY))
        .ok_or_else(|| {
            Error::token(format!(
                "secret {name} has no \"{TOKEN_SECRET_KEY}\" key"
            ))
        })?;
    String::from_utf8(data.0.clone())
        .map_err(|_| Error::token(format!("secret {name} holds a non-UTF8 token")))
}

/// Load a cloud token from a named secret
///
/// Returns `Ok(None)` while the secret does not exist yet: load-zone
/// secrets are often created moments after the zone itself, so absence
/// means "requeue", not "fail". A present secret without the token key
/// is a hard error.
pub async fn load_token_by_name(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<String>> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match secrets.get(name).await {
        Ok(secret) => token_from_secret(&secret).map(Some),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(namespace, name, "token secret not found yet");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the operator-wide cloud token by label
///
/// Looks for a secret labelled `k6cloud=token` in the operator's own
/// namespace. Unlike the by-name lookup, a missing secret here is a
/// setup mistake and fails the operation outright.
pub async fn load_token_by_label(client: &Client) -> Result<String> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), SYSTEM_NAMESPACE);
    let selector = format!("{}={}", TOKEN_LABEL.0, TOKEN_LABEL.1);
    let list = secrets
        .list(&ListParams::default().labels(&selector))
        .await?;

    let secret = list.items.first().ok_or_else(|| {
        Error::token(format!(
            "no secret with label {selector} found in {SYSTEM_NAMESPACE}"
        ))
    })?;
    token_from_secret(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn sample_secret(key: &str, value: &[u8]) -> Secret {
        let mut data = BTreeMap::new();
        data.insert(key.to_string(), ByteString(value.to_vec()));
        Secret {
            metadata: ObjectMeta {
                name: Some("cloud-token".to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn token_extracted_from_secret_data() {
        let secret = sample_secret("token", b"abc123");
        assert_eq!(token_from_secret(&secret).unwrap(), "abc123");
    }

    #[test]
    fn missing_token_key_is_hard_error() {
        let secret = sample_secret("password", b"abc123");
        let err = token_from_secret(&secret).unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("cloud-token"));
    }

    #[test]
    fn non_utf8_token_is_hard_error() {
        let secret = sample_secret("token", &[0xff, 0xfe]);
        assert!(token_from_secret(&secret).is_err());
    }
}
