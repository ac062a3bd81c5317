//! PrivateLoadZone CRD types
//!
//! A PrivateLoadZone registers this cluster as a load zone with the
//! cloud backend; the operator then polls for runs assigned to the zone
//! and materializes them as TestRuns.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvFromSource, LocalObjectReference};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::{self, Condition, ConditionStatus, ConditionType};

/// Finalizer guarding backend deregistration
pub const PLZ_FINALIZER: &str = "privateloadzones.k6.io/finalizer";

/// Annotation holding the backend registration id
pub const PLZ_UID_ANNOTATION: &str = "privateloadzones.k6.io/plz-uid";

/// Cluster-side registration of a cloud load zone
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k6.io",
    version = "v1alpha1",
    kind = "PrivateLoadZone",
    plural = "privateloadzones",
    namespaced,
    status = "PrivateLoadZoneStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PrivateLoadZoneSpec {
    /// Name of the secret holding the cloud token for this zone
    pub token: String,

    /// Per-runner compute resources, advertised to the backend
    /// (cpu and memory quantities)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Quantity>,

    /// Service account for the runner pods this zone spawns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Node selector for the runner pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Pull secrets for private runner images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Environment sources injected into every runner pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<EnvFromSource>,
}

/// Observed state of a PrivateLoadZone
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateLoadZoneStatus {
    /// Conditions, unique by type (only `PLZRegistered` is used)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl PrivateLoadZoneStatus {
    /// Whether the zone is registered with the backend
    pub fn is_registered(&self) -> bool {
        conditions::is_true(&self.conditions, ConditionType::PLZRegistered)
    }

    /// Whether registration has never succeeded (absent or Unknown)
    pub fn is_unregistered(&self) -> bool {
        conditions::is_unknown(&self.conditions, ConditionType::PLZRegistered)
    }

    /// Record the registration outcome
    pub fn set_registered(&mut self, registered: bool) {
        let status = if registered {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        conditions::update_condition(&mut self.conditions, ConditionType::PLZRegistered, status);
    }

    /// Merge a concurrently-proposed status; no companion scalars here
    pub fn set_if_newer(&mut self, proposed: &PrivateLoadZoneStatus) -> bool {
        conditions::set_if_newer(&mut self.conditions, &proposed.conditions, |_| false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_zone_is_unregistered() {
        let status = PrivateLoadZoneStatus::default();
        assert!(!status.is_registered());
        assert!(status.is_unregistered());
    }

    #[test]
    fn registration_flips_condition() {
        let mut status = PrivateLoadZoneStatus::default();
        status.set_registered(false);
        assert!(!status.is_registered());
        assert!(!status.is_unregistered());

        status.set_registered(true);
        assert!(status.is_registered());
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].reason, "PLZRegisteredTrue");
    }

    #[test]
    fn merge_keeps_latest_registration() {
        let mut status = PrivateLoadZoneStatus::default();
        status.set_registered(true);

        // a stale deregistration proposal loses
        let mut stale = PrivateLoadZoneStatus::default();
        stale.set_registered(false);
        stale.conditions[0].last_transition_time =
            status.conditions[0].last_transition_time - Duration::seconds(10);

        assert!(!status.set_if_newer(&stale));
        assert!(status.is_registered());
    }
}
