//! TestRun CRD types
//!
//! Defines `TestRun` — a distributed k6 execution: N parallel runner
//! jobs fed from a shared script, paced through a forward-only stage
//! machine, optionally tied to the cloud backend.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvFromSource, EnvVar, LocalObjectReference,
    PersistentVolumeClaimVolumeSource, ResourceRequirements, Volume, VolumeMount,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::{self, ConditionStatus, ConditionType};
use crate::error::Error;

// =============================================================================
// Stage
// =============================================================================

/// Lifecycle stage of a TestRun
///
/// Stages only move forward; `finished` and `error` are terminal.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Stage {
    /// No stage recorded yet (empty string on the wire)
    #[default]
    #[serde(rename = "")]
    Pending,
    /// Initializer job is inspecting the script
    #[serde(rename = "initialization")]
    Initialization,
    /// Script validated, cloud run set up if applicable
    #[serde(rename = "initialized")]
    Initialized,
    /// Runner jobs and services created, waiting for readiness
    #[serde(rename = "created")]
    Created,
    /// Starter resumed the runners; test is executing
    #[serde(rename = "started")]
    Started,
    /// All runners done (or aborted); teardown territory
    #[serde(rename = "stopped")]
    Stopped,
    /// Run finalized
    #[serde(rename = "finished")]
    Finished,
    /// Terminal failure; never left
    #[serde(rename = "error")]
    Error,
}

impl Stage {
    /// Stable string form, as stored in the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "",
            Stage::Initialization => "initialization",
            Stage::Initialized => "initialized",
            Stage::Created => "created",
            Stage::Started => "started",
            Stage::Stopped => "stopped",
            Stage::Finished => "finished",
            Stage::Error => "error",
        }
    }

    /// Whether a proposed stage is a legal successor of this one
    ///
    /// Used when merging a concurrently-proposed status: a proposal that
    /// would move the stage backwards (or out of a terminal stage) is
    /// dropped, the rest of the proposal still applies.
    pub fn accepts(self, proposed: Stage) -> bool {
        use Stage::*;
        match self {
            Pending | Initialization => true,
            Initialized => !matches!(proposed, Pending | Initialization),
            Created => matches!(proposed, Started | Stopped | Finished | Error),
            Started => matches!(proposed, Stopped | Finished | Error),
            Stopped => matches!(proposed, Finished | Error),
            Finished | Error => false,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cleanup
// =============================================================================

/// Automatic cleanup of the TestRun resource after execution
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Cleanup {
    /// Delete the TestRun once it reaches a terminal stage
    #[serde(rename = "post")]
    Post,
}

// =============================================================================
// Script
// =============================================================================

/// Script held in a ConfigMap
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ConfigMapScript {
    /// ConfigMap name
    pub name: String,
    /// Key inside the ConfigMap; defaults to `test.js`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Script held in a PersistentVolumeClaim
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct VolumeClaimScript {
    /// Claim name
    pub name: String,
    /// File within the volume; defaults to `test.js`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Mount the claim read-only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

/// Where the test script lives
///
/// Exactly one source must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// Script in a ConfigMap, mounted under `/test`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapScript>,
    /// Script in a PersistentVolumeClaim, mounted under `/test`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim: Option<VolumeClaimScript>,
    /// Script already present in the runner image, absolute path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_file: Option<String>,
}

const SCRIPT_VOLUME: &str = "k6-test-volume";
const SCRIPT_MOUNT_PATH: &str = "/test";
const DEFAULT_SCRIPT_FILE: &str = "test.js";

enum ScriptSource<'a> {
    ConfigMap(&'a ConfigMapScript),
    VolumeClaim(&'a VolumeClaimScript),
    LocalFile(&'a str),
}

impl Script {
    fn source(&self) -> Result<ScriptSource<'_>, Error> {
        if let Some(cm) = &self.config_map {
            Ok(ScriptSource::ConfigMap(cm))
        } else if let Some(vc) = &self.volume_claim {
            Ok(ScriptSource::VolumeClaim(vc))
        } else if let Some(lf) = &self.local_file {
            Ok(ScriptSource::LocalFile(lf))
        } else {
            Err(Error::configuration(
                "script source is missing: set one of configMap, volumeClaim or localFile",
            ))
        }
    }

    /// Validate that a source is configured
    pub fn validate(&self) -> Result<(), Error> {
        self.source().map(|_| ())
    }

    /// Absolute path of the script inside a runner container
    pub fn full_path(&self) -> Result<String, Error> {
        match self.source()? {
            ScriptSource::ConfigMap(cm) => Ok(format!(
                "{SCRIPT_MOUNT_PATH}/{}",
                cm.file.as_deref().unwrap_or(DEFAULT_SCRIPT_FILE)
            )),
            ScriptSource::VolumeClaim(vc) => Ok(format!(
                "{SCRIPT_MOUNT_PATH}/{}",
                vc.file.as_deref().unwrap_or(DEFAULT_SCRIPT_FILE)
            )),
            ScriptSource::LocalFile(path) => Ok(path.to_string()),
        }
    }

    /// Volumes to attach to runner/initializer pods; empty for local files
    pub fn volumes(&self) -> Vec<Volume> {
        match self.source() {
            Ok(ScriptSource::ConfigMap(cm)) => vec![Volume {
                name: SCRIPT_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: cm.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            Ok(ScriptSource::VolumeClaim(vc)) => vec![Volume {
                name: SCRIPT_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: vc.name.clone(),
                    read_only: Some(vc.read_only),
                }),
                ..Default::default()
            }],
            _ => Vec::new(),
        }
    }

    /// Matching mounts for [`Script::volumes`]
    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        match self.source() {
            Ok(ScriptSource::ConfigMap(_)) | Ok(ScriptSource::VolumeClaim(_)) => {
                vec![VolumeMount {
                    name: SCRIPT_VOLUME.to_string(),
                    mount_path: SCRIPT_MOUNT_PATH.to_string(),
                    ..Default::default()
                }]
            }
            _ => Vec::new(),
        }
    }

    /// Wrap a container command with an existence check for local files
    ///
    /// ConfigMap/volume scripts run the command as-is; a missing local
    /// file fails fast instead of producing a cryptic k6 error.
    pub fn wrap_command(&self, cmd: Vec<String>) -> Result<Vec<String>, Error> {
        match self.source()? {
            ScriptSource::LocalFile(_) => {
                let full = self.full_path()?;
                let joined = cmd.join(" ");
                Ok(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!(
                        "if [ ! -f {full} ]; then echo \"LocalFile not found exiting...\"; exit 1; fi;\n{joined}"
                    ),
                ])
            }
            _ => Ok(cmd),
        }
    }
}

// =============================================================================
// Pod knobs
// =============================================================================

/// Pod-level customization for runner, starter and initializer pods
///
/// Everything here is an opaque pass-through onto the generated pods.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodOptions {
    /// Container image; each pod kind has its own default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Extra environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Environment sourced from ConfigMaps/Secrets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,

    /// Compute resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Service account for the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Pull secrets for private registries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Extra volumes, merged with the script volume
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Extra volume mounts, merged with the script mount
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Init containers to run before the main container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
}

// =============================================================================
// CRD
// =============================================================================

/// Distributed k6 load test
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k6.io",
    version = "v1alpha1",
    kind = "TestRun",
    plural = "testruns",
    namespaced,
    status = "TestRunStatus",
    printcolumn = r#"{"name":"Stage","type":"string","jsonPath":".status.stage"}"#,
    printcolumn = r#"{"name":"TestRunID","type":"string","jsonPath":".status.testRunId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TestRunSpec {
    /// Where the test script lives
    pub script: Script,

    /// Number of runner pods to distribute the test across
    pub parallelism: i32,

    /// Extra k6 command-line arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,

    /// Initializer pod customization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<PodOptions>,

    /// Starter pod customization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starter: Option<PodOptions>,

    /// Runner pod customization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<PodOptions>,

    /// Start runners paused; the starter job resumes them
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Automatic cleanup of this resource after the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<Cleanup>,

    /// Backend run id, set only by the load-zone worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,

    /// Name of the secret holding the cloud token for this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Observed state of a TestRun
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestRunStatus {
    /// Current lifecycle stage
    #[serde(default)]
    pub stage: Stage,

    /// Backend run id, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,

    /// Encoded metric-aggregation settings from the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_vars: Option<String>,

    /// Conditions, unique by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<conditions::Condition>,
}

impl TestRunStatus {
    /// Whether this run is tied to the cloud backend
    pub fn is_cloud(&self) -> bool {
        conditions::is_true(&self.conditions, ConditionType::CloudTestRun)
    }

    /// Whether this cloud run originated from a private load zone
    pub fn is_plz(&self) -> bool {
        conditions::is_true(&self.conditions, ConditionType::CloudPLZTestRun)
    }

    /// Populate default conditions on entry into `initialization`
    ///
    /// A spec with a reserved `testRunId` was created by a load-zone
    /// worker: its cloud identity is already decided, and abort polling
    /// is armed immediately.
    pub fn initialize(&mut self, spec: &TestRunSpec) {
        use conditions::update_condition;
        use ConditionStatus::*;
        use ConditionType::*;

        update_condition(&mut self.conditions, CloudTestRun, Unknown);
        update_condition(&mut self.conditions, TestRunRunning, Unknown);
        update_condition(&mut self.conditions, TeardownExecuted, False);

        match spec.test_run_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                update_condition(&mut self.conditions, CloudTestRun, True);
                update_condition(&mut self.conditions, CloudPLZTestRun, True);
                update_condition(&mut self.conditions, CloudTestRunCreated, True);
                update_condition(&mut self.conditions, CloudTestRunFinalized, False);
                update_condition(&mut self.conditions, CloudTestRunAborted, False);
                self.test_run_id = Some(id.to_string());
            }
            None => {
                update_condition(&mut self.conditions, CloudPLZTestRun, False);
            }
        }
    }

    /// Merge a concurrently-proposed status into this one
    ///
    /// Stage moves only along legal transitions; conditions merge per
    /// [`conditions::set_if_newer`]; the backend run id is copied only
    /// alongside a `CloudTestRunCreated` proposal and only when unset,
    /// aggregation vars only when unset. Returns whether anything was
    /// accepted.
    pub fn set_if_newer(&mut self, proposed: &TestRunStatus) -> bool {
        let mut is_newer = false;

        if self.stage != proposed.stage && self.stage.accepts(proposed.stage) {
            self.stage = proposed.stage;
            is_newer = true;
        }

        let TestRunStatus {
            conditions: existing,
            test_run_id,
            aggregation_vars,
            ..
        } = self;

        let conditions_newer =
            conditions::set_if_newer(existing, &proposed.conditions, |condition| {
                let mut copied = false;
                if condition.type_ == ConditionType::CloudTestRunCreated
                    && test_run_id.is_none()
                    && proposed.test_run_id.is_some()
                {
                    *test_run_id = proposed.test_run_id.clone();
                    copied = true;
                }
                if aggregation_vars.is_none() && proposed.aggregation_vars.is_some() {
                    *aggregation_vars = proposed.aggregation_vars.clone();
                    copied = true;
                }
                copied
            });

        is_newer || conditions_newer
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::conditions::{update_condition, Condition};
    use chrono::Duration;

    fn sample_spec() -> TestRunSpec {
        TestRunSpec {
            script: Script {
                config_map: Some(ConfigMapScript {
                    name: "load-test".to_string(),
                    file: None,
                }),
                ..Default::default()
            },
            parallelism: 4,
            ..Default::default()
        }
    }

    #[test]
    fn stage_roundtrips_with_wire_names() {
        assert_eq!(serde_json::to_value(Stage::Pending).unwrap(), "");
        assert_eq!(serde_json::to_value(Stage::Started).unwrap(), "started");
        let s: Stage = serde_json::from_value(serde_json::json!("initialization")).unwrap();
        assert_eq!(s, Stage::Initialization);
        let s: Stage = serde_json::from_value(serde_json::json!("")).unwrap();
        assert_eq!(s, Stage::Pending);
    }

    #[test]
    fn stage_transition_table() {
        use Stage::*;
        // early stages accept everything ahead of them
        assert!(Pending.accepts(Error));
        assert!(Initialization.accepts(Finished));
        assert!(Initialized.accepts(Created));
        assert!(!Initialized.accepts(Initialization));
        // created may jump straight to stopped on abort
        assert!(Created.accepts(Started));
        assert!(Created.accepts(Stopped));
        assert!(!Created.accepts(Initialized));
        assert!(Started.accepts(Stopped));
        assert!(Started.accepts(Error));
        assert!(!Started.accepts(Created));
        assert!(Stopped.accepts(Finished));
        assert!(!Stopped.accepts(Started));
        // terminal stages accept nothing
        for next in [
            Pending,
            Initialization,
            Initialized,
            Created,
            Started,
            Stopped,
            Finished,
            Error,
        ] {
            assert!(!Finished.accepts(next));
            assert!(!Error.accepts(next));
        }
    }

    /// Story: a plain (non-cloud) run starts with the type undecided
    #[test]
    fn story_initialize_plain_run() {
        let spec = sample_spec();
        let mut status = TestRunStatus::default();
        status.initialize(&spec);

        assert!(conditions::is_unknown(
            &status.conditions,
            ConditionType::CloudTestRun
        ));
        assert!(conditions::is_unknown(
            &status.conditions,
            ConditionType::TestRunRunning
        ));
        assert!(conditions::is_false(
            &status.conditions,
            ConditionType::TeardownExecuted
        ));
        assert!(conditions::is_false(
            &status.conditions,
            ConditionType::CloudPLZTestRun
        ));
        assert!(status.test_run_id.is_none());
        assert!(!status.is_cloud());
    }

    /// Story: a run created by a load-zone worker is born cloud-bound
    ///
    /// The reserved testRunId in the spec means the backend already knows
    /// about this run, so the cloud conditions are decided up front and
    /// abort polling is armed.
    #[test]
    fn story_initialize_plz_run() {
        let mut spec = sample_spec();
        spec.test_run_id = Some("123456".to_string());
        let mut status = TestRunStatus::default();
        status.initialize(&spec);

        assert!(status.is_cloud());
        assert!(status.is_plz());
        assert!(conditions::is_true(
            &status.conditions,
            ConditionType::CloudTestRunCreated
        ));
        assert!(conditions::is_false(
            &status.conditions,
            ConditionType::CloudTestRunFinalized
        ));
        assert!(conditions::is_false(
            &status.conditions,
            ConditionType::CloudTestRunAborted
        ));
        assert_eq!(status.test_run_id.as_deref(), Some("123456"));
    }

    #[test]
    fn set_if_newer_moves_stage_forward_only() {
        let mut status = TestRunStatus {
            stage: Stage::Started,
            ..Default::default()
        };

        let regression = TestRunStatus {
            stage: Stage::Created,
            ..Default::default()
        };
        assert!(!status.set_if_newer(&regression));
        assert_eq!(status.stage, Stage::Started);

        let progress = TestRunStatus {
            stage: Stage::Stopped,
            ..Default::default()
        };
        assert!(status.set_if_newer(&progress));
        assert_eq!(status.stage, Stage::Stopped);
    }

    #[test]
    fn set_if_newer_copies_run_id_once() {
        let mut status = TestRunStatus::default();

        let mut proposed = TestRunStatus {
            test_run_id: Some("111".to_string()),
            ..Default::default()
        };
        update_condition(
            &mut proposed.conditions,
            ConditionType::CloudTestRunCreated,
            ConditionStatus::True,
        );

        assert!(status.set_if_newer(&proposed));
        assert_eq!(status.test_run_id.as_deref(), Some("111"));

        // a later proposal with a different id must not overwrite it
        let mut conflicting = proposed.clone();
        conflicting.test_run_id = Some("222".to_string());
        conflicting.conditions[0].last_transition_time += Duration::seconds(5);
        status.set_if_newer(&conflicting);
        assert_eq!(status.test_run_id.as_deref(), Some("111"));
    }

    #[test]
    fn set_if_newer_run_id_requires_created_condition() {
        let mut status = TestRunStatus::default();

        // run id rides along an unrelated condition: not copied
        let proposed = TestRunStatus {
            test_run_id: Some("111".to_string()),
            conditions: vec![Condition::new(
                ConditionType::TestRunRunning,
                ConditionStatus::True,
            )],
            ..Default::default()
        };
        status.set_if_newer(&proposed);
        assert!(status.test_run_id.is_none());
    }

    #[test]
    fn set_if_newer_copies_aggregation_vars_when_unset() {
        let mut status = TestRunStatus::default();
        let proposed = TestRunStatus {
            aggregation_vars: Some("50|3s|8s|6s|100000|10".to_string()),
            conditions: vec![Condition::new(
                ConditionType::CloudTestRunCreated,
                ConditionStatus::True,
            )],
            ..Default::default()
        };

        assert!(status.set_if_newer(&proposed));
        assert_eq!(
            status.aggregation_vars.as_deref(),
            Some("50|3s|8s|6s|100000|10")
        );
    }

    /// Story: two overlapping reconciles abort a started run
    ///
    /// Both observe the abort signal and each proposes the stopped
    /// outcome. The merged status must carry the full abort record, and
    /// whichever proposal lands second must neither regress the stage
    /// nor re-arm the transition timestamps that time windows hang off.
    #[test]
    fn story_overlapping_abort_proposals_converge() {
        fn abort_proposal(skew: i64) -> TestRunStatus {
            let mut proposed = TestRunStatus {
                stage: Stage::Stopped,
                ..Default::default()
            };
            update_condition(
                &mut proposed.conditions,
                ConditionType::TestRunRunning,
                ConditionStatus::False,
            );
            update_condition(
                &mut proposed.conditions,
                ConditionType::CloudTestRunAborted,
                ConditionStatus::True,
            );
            for condition in &mut proposed.conditions {
                condition.last_transition_time += Duration::seconds(skew);
            }
            proposed
        }

        let mut status = TestRunStatus {
            stage: Stage::Started,
            ..Default::default()
        };
        update_condition(
            &mut status.conditions,
            ConditionType::TestRunRunning,
            ConditionStatus::True,
        );

        assert!(status.set_if_newer(&abort_proposal(1)));
        assert_eq!(status.stage, Stage::Stopped);
        assert!(conditions::is_false(
            &status.conditions,
            ConditionType::TestRunRunning
        ));
        assert!(conditions::is_true(
            &status.conditions,
            ConditionType::CloudTestRunAborted
        ));
        let settled =
            conditions::last_update(&status.conditions, ConditionType::CloudTestRunAborted);

        status.set_if_newer(&abort_proposal(2));
        assert_eq!(status.stage, Stage::Stopped);
        assert!(conditions::is_false(
            &status.conditions,
            ConditionType::TestRunRunning
        ));
        assert!(conditions::is_true(
            &status.conditions,
            ConditionType::CloudTestRunAborted
        ));
        assert_eq!(
            conditions::last_update(&status.conditions, ConditionType::CloudTestRunAborted),
            settled
        );
    }

    #[test]
    fn script_config_map_defaults() {
        let script = Script {
            config_map: Some(ConfigMapScript {
                name: "my-test".to_string(),
                file: None,
            }),
            ..Default::default()
        };
        assert_eq!(script.full_path().unwrap(), "/test/test.js");
        assert_eq!(script.volumes().len(), 1);
        assert_eq!(script.volume_mounts()[0].mount_path, "/test");
        // command untouched for mounted scripts
        let cmd = vec!["k6".to_string(), "run".to_string()];
        assert_eq!(script.wrap_command(cmd.clone()).unwrap(), cmd);
    }

    #[test]
    fn script_local_file_wraps_command() {
        let script = Script {
            local_file: Some("/opt/tests/smoke.js".to_string()),
            ..Default::default()
        };
        assert_eq!(script.full_path().unwrap(), "/opt/tests/smoke.js");
        assert!(script.volumes().is_empty());
        assert!(script.volume_mounts().is_empty());

        let wrapped = script
            .wrap_command(vec!["k6".to_string(), "run".to_string()])
            .unwrap();
        assert_eq!(wrapped[0], "sh");
        assert!(wrapped[2].contains("/opt/tests/smoke.js"));
        assert!(wrapped[2].contains("k6 run"));
    }

    #[test]
    fn script_missing_source_is_configuration_error() {
        let script = Script::default();
        assert!(matches!(
            script.validate(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn status_serializes_with_k8s_field_names() {
        let status = TestRunStatus {
            stage: Stage::Created,
            test_run_id: Some("42".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["stage"], "created");
        assert_eq!(json["testRunId"], "42");
        assert!(json.get("aggregationVars").is_none());
    }
}
