//! Condition vocabulary and merge protocol
//!
//! Conditions are tri-state facts about a test run or load zone. The
//! vocabulary is closed: both the type and the status are enums, and the
//! `(type, status) -> reason` mapping is an exhaustive match, so an
//! invalid combination cannot be constructed at runtime.
//!
//! `set_if_newer` is the heart of the optimistic status protocol: it
//! accepts proposed conditions only when they are chronologically and
//! logically consistent with the existing ones, which lets two
//! overlapping reconciles converge instead of clobbering each other.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The closed set of condition types used across TestRun and
/// PrivateLoadZone statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    /// The test is currently executing.
    /// - Unknown: any stage before the starter resumes the runners
    /// - True: after a successful start, before all runners finished
    /// - False: after all runners have finished, successfully or not
    TestRunRunning,
    /// `teardown()` has been executed for this run (PLZ runs only).
    TeardownExecuted,
    /// This run is tied to the cloud backend.
    /// Unknown until the type of the test is determined.
    CloudTestRun,
    /// A backend test-run id exists for this run.
    CloudTestRunCreated,
    /// The backend run has been finalized.
    CloudTestRunFinalized,
    /// This cloud run originated from a private load zone.
    /// Only meaningful when CloudTestRun is True as well.
    CloudPLZTestRun,
    /// The backend requested an abort of this run.
    CloudTestRunAborted,
    /// The load zone is registered with the backend.
    PLZRegistered,
}

impl ConditionType {
    /// Stable string form, as stored in the status
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::TestRunRunning => "TestRunRunning",
            ConditionType::TeardownExecuted => "TeardownExecuted",
            ConditionType::CloudTestRun => "CloudTestRun",
            ConditionType::CloudTestRunCreated => "CloudTestRunCreated",
            ConditionType::CloudTestRunFinalized => "CloudTestRunFinalized",
            ConditionType::CloudPLZTestRun => "CloudPLZTestRun",
            ConditionType::CloudTestRunAborted => "CloudTestRunAborted",
            ConditionType::PLZRegistered => "PLZRegistered",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    /// The fact holds
    True,
    /// The fact does not hold
    False,
    /// Not determined yet; a condition may start here but never returns here
    Unknown,
}

/// Reason string for a `(type, status)` pair
///
/// The mapping is total by construction: every legal combination has a
/// reason, and there is no way to ask for an illegal one.
pub fn reason(type_: ConditionType, status: ConditionStatus) -> &'static str {
    use ConditionStatus::*;
    use ConditionType::*;
    match (type_, status) {
        (TestRunRunning, Unknown) => "TestRunPreparation",
        (TestRunRunning, True) => "TestRunRunningTrue",
        (TestRunRunning, False) => "TestRunRunningFalse",

        (TeardownExecuted, Unknown) => "TestRunPreparation",
        (TeardownExecuted, True) => "TeardownExecutedTrue",
        (TeardownExecuted, False) => "TeardownExecutedFalse",

        (CloudTestRun, Unknown) => "TestRunTypeUnknown",
        (CloudTestRun, True) => "CloudTestRunTrue",
        (CloudTestRun, False) => "CloudTestRunFalse",

        (CloudTestRunCreated, Unknown) => "CloudTestRunCreatedUnknown",
        (CloudTestRunCreated, True) => "CloudTestRunCreatedTrue",
        (CloudTestRunCreated, False) => "CloudTestRunCreatedFalse",

        (CloudTestRunFinalized, Unknown) => "CloudTestRunFinalizedUnknown",
        (CloudTestRunFinalized, True) => "CloudTestRunFinalizedTrue",
        (CloudTestRunFinalized, False) => "CloudTestRunFinalizedFalse",

        (CloudPLZTestRun, Unknown) => "CloudPLZTestRunUnknown",
        (CloudPLZTestRun, True) => "CloudPLZTestRunTrue",
        (CloudPLZTestRun, False) => "CloudPLZTestRunFalse",

        (CloudTestRunAborted, Unknown) => "CloudTestRunAbortedUnknown",
        (CloudTestRunAborted, True) => "CloudTestRunAbortedTrue",
        (CloudTestRunAborted, False) => "CloudTestRunAbortedFalse",

        (PLZRegistered, Unknown) => "PLZRegisteredUnknown",
        (PLZRegistered, True) => "PLZRegisteredTrue",
        (PLZRegistered, False) => "PLZRegisteredFalse",
    }
}

/// A single condition entry in a resource status
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition identity
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Current tri-state value
    pub status: ConditionStatus,
    /// Machine-readable reason for the current status
    pub reason: String,
    /// When the status last changed
    pub last_transition_time: DateTime<Utc>,
    /// Optional human-readable detail
    #[serde(default)]
    pub message: String,
}

impl Condition {
    /// Build a condition for the given pair, timestamped now
    pub fn new(type_: ConditionType, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            reason: reason(type_, status).to_string(),
            last_transition_time: Utc::now(),
            message: String::new(),
        }
    }
}

/// Find a condition by type
pub fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True iff the condition exists with status True
pub fn is_true(conditions: &[Condition], type_: ConditionType) -> bool {
    matches!(find(conditions, type_), Some(c) if c.status == ConditionStatus::True)
}

/// True iff the condition exists with status False
pub fn is_false(conditions: &[Condition], type_: ConditionType) -> bool {
    matches!(find(conditions, type_), Some(c) if c.status == ConditionStatus::False)
}

/// True iff the condition is absent or has status Unknown
pub fn is_unknown(conditions: &[Condition], type_: ConditionType) -> bool {
    !is_true(conditions, type_) && !is_false(conditions, type_)
}

/// Last transition time of the condition, if it exists
pub fn last_update(conditions: &[Condition], type_: ConditionType) -> Option<DateTime<Utc>> {
    find(conditions, type_).map(|c| c.last_transition_time)
}

/// Upsert a condition with the mapped reason
///
/// The transition timestamp refreshes only when the status actually
/// changes; re-asserting the same status keeps the original timestamp.
/// The stuck-pod and teardown-wait windows depend on this.
pub fn update_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
) {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        None => conditions.push(Condition::new(type_, status)),
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Utc::now();
            }
            existing.reason = reason(type_, status).to_string();
            existing.message.clear();
        }
    }
}

/// Merge proposed conditions into existing ones if they are newer
///
/// Rules:
/// - a proposed condition whose type is new is always accepted;
/// - an existing type is updated only when the proposal's transition
///   time is strictly later AND the proposed status is not Unknown —
///   conditions may start Unknown but never regress to it;
/// - the hook runs for every proposed condition and may copy companion
///   scalar fields; a `true` return marks the merge as changed.
///
/// Returns whether anything was accepted.
pub fn set_if_newer<F>(existing: &mut Vec<Condition>, proposed: &[Condition], mut hook: F) -> bool
where
    F: FnMut(&Condition) -> bool,
{
    let mut is_newer = false;

    for proposal in proposed {
        match existing.iter_mut().find(|c| c.type_ == proposal.type_) {
            None => {
                existing.push(proposal.clone());
                is_newer = true;
            }
            Some(current) => {
                if proposal.status != ConditionStatus::Unknown
                    && current.last_transition_time < proposal.last_transition_time
                {
                    if current.status != proposal.status {
                        current.status = proposal.status;
                        current.last_transition_time = proposal.last_transition_time;
                    }
                    current.reason = proposal.reason.clone();
                    current.message = proposal.message.clone();
                    is_newer = true;
                }
            }
        }

        if hook(proposal) {
            is_newer = true;
        }
    }

    is_newer
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn no_hook(_: &Condition) -> bool {
        false
    }

    #[test]
    fn reason_special_cases() {
        assert_eq!(
            reason(ConditionType::TestRunRunning, ConditionStatus::Unknown),
            "TestRunPreparation"
        );
        assert_eq!(
            reason(ConditionType::TeardownExecuted, ConditionStatus::Unknown),
            "TestRunPreparation"
        );
        assert_eq!(
            reason(ConditionType::CloudTestRun, ConditionStatus::Unknown),
            "TestRunTypeUnknown"
        );
        // everything else is "<Type><Status>"
        assert_eq!(
            reason(ConditionType::PLZRegistered, ConditionStatus::True),
            "PLZRegisteredTrue"
        );
        assert_eq!(
            reason(ConditionType::CloudTestRunAborted, ConditionStatus::False),
            "CloudTestRunAbortedFalse"
        );
    }

    #[test]
    fn update_condition_inserts_and_flips() {
        let mut conditions = Vec::new();

        update_condition(
            &mut conditions,
            ConditionType::TestRunRunning,
            ConditionStatus::Unknown,
        );
        assert_eq!(conditions.len(), 1);
        assert!(is_unknown(&conditions, ConditionType::TestRunRunning));
        let t0 = conditions[0].last_transition_time;

        update_condition(
            &mut conditions,
            ConditionType::TestRunRunning,
            ConditionStatus::True,
        );
        assert!(is_true(&conditions, ConditionType::TestRunRunning));
        assert_eq!(conditions[0].reason, "TestRunRunningTrue");
        assert!(conditions[0].last_transition_time >= t0);
    }

    #[test]
    fn update_condition_same_status_keeps_timestamp() {
        let mut conditions = vec![Condition {
            type_: ConditionType::TestRunRunning,
            status: ConditionStatus::True,
            reason: "TestRunRunningTrue".to_string(),
            last_transition_time: Utc::now() - Duration::minutes(10),
            message: String::new(),
        }];
        let before = conditions[0].last_transition_time;

        update_condition(
            &mut conditions,
            ConditionType::TestRunRunning,
            ConditionStatus::True,
        );

        // Re-asserting True must not refresh the transition time: the
        // teardown-wait window is measured from it.
        assert_eq!(conditions[0].last_transition_time, before);
    }

    #[test]
    fn set_if_newer_accepts_new_types() {
        let mut existing = Vec::new();
        let proposed = vec![Condition::new(
            ConditionType::CloudTestRun,
            ConditionStatus::Unknown,
        )];

        assert!(set_if_newer(&mut existing, &proposed, no_hook));
        assert_eq!(existing.len(), 1);
    }

    #[test]
    fn set_if_newer_is_idempotent() {
        let mut existing = Vec::new();
        let proposed = vec![Condition::new(
            ConditionType::TestRunRunning,
            ConditionStatus::True,
        )];

        assert!(set_if_newer(&mut existing, &proposed, no_hook));
        // applying the very same proposal again changes nothing
        assert!(!set_if_newer(&mut existing, &proposed, no_hook));
    }

    #[test]
    fn set_if_newer_rejects_stale_proposals() {
        let mut existing = vec![Condition::new(
            ConditionType::TestRunRunning,
            ConditionStatus::True,
        )];

        let mut stale = Condition::new(ConditionType::TestRunRunning, ConditionStatus::False);
        stale.last_transition_time = existing[0].last_transition_time - Duration::seconds(30);

        assert!(!set_if_newer(&mut existing, &[stale], no_hook));
        assert!(is_true(&existing, ConditionType::TestRunRunning));
    }

    #[test]
    fn set_if_newer_never_regresses_to_unknown() {
        let mut existing = vec![Condition::new(
            ConditionType::TestRunRunning,
            ConditionStatus::False,
        )];

        // even a later Unknown proposal must be rejected
        let mut unknown = Condition::new(ConditionType::TestRunRunning, ConditionStatus::Unknown);
        unknown.last_transition_time = existing[0].last_transition_time + Duration::seconds(30);

        assert!(!set_if_newer(&mut existing, &[unknown], no_hook));
        assert!(is_false(&existing, ConditionType::TestRunRunning));
    }

    #[test]
    fn set_if_newer_accepts_strictly_later_change() {
        let mut existing = vec![Condition::new(
            ConditionType::TestRunRunning,
            ConditionStatus::True,
        )];

        let mut newer = Condition::new(ConditionType::TestRunRunning, ConditionStatus::False);
        newer.last_transition_time = existing[0].last_transition_time + Duration::seconds(5);

        assert!(set_if_newer(&mut existing, &[newer.clone()], no_hook));
        assert!(is_false(&existing, ConditionType::TestRunRunning));
        assert_eq!(existing[0].last_transition_time, newer.last_transition_time);
    }

    #[test]
    fn set_if_newer_hook_marks_change() {
        let mut existing = vec![Condition::new(
            ConditionType::CloudTestRunCreated,
            ConditionStatus::True,
        )];
        // conditions themselves are unchanged; only the hook reports work
        let proposed = existing.clone();

        let mut copied = false;
        let newer = set_if_newer(&mut existing, &proposed, |c| {
            if c.type_ == ConditionType::CloudTestRunCreated && !copied {
                copied = true;
                return true;
            }
            false
        });
        assert!(newer);
        assert!(copied);
    }

    #[test]
    fn probes_on_missing_condition() {
        let conditions: Vec<Condition> = Vec::new();
        assert!(!is_true(&conditions, ConditionType::PLZRegistered));
        assert!(!is_false(&conditions, ConditionType::PLZRegistered));
        assert!(is_unknown(&conditions, ConditionType::PLZRegistered));
        assert!(last_update(&conditions, ConditionType::PLZRegistered).is_none());
    }

    #[test]
    fn condition_serializes_with_k8s_field_names() {
        let condition = Condition::new(ConditionType::CloudPLZTestRun, ConditionStatus::True);
        let json = serde_json::to_value(&condition).expect("serializable");
        assert_eq!(json["type"], "CloudPLZTestRun");
        assert_eq!(json["status"], "True");
        assert_eq!(json["reason"], "CloudPLZTestRunTrue");
        assert!(json["lastTransitionTime"].is_string());
    }
}
