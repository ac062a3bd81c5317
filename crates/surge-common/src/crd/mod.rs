//! Custom Resource Definitions for surge
//!
//! This module contains the TestRun and PrivateLoadZone CRDs and the
//! condition protocol their statuses share.

pub mod conditions;
mod privateloadzone;
mod testrun;

pub use conditions::{Condition, ConditionStatus, ConditionType};
pub use privateloadzone::{
    PrivateLoadZone, PrivateLoadZoneSpec, PrivateLoadZoneStatus, PLZ_FINALIZER, PLZ_UID_ANNOTATION,
};
pub use testrun::{
    Cleanup, ConfigMapScript, PodOptions, Script, Stage, TestRun, TestRunSpec, TestRunStatus,
    VolumeClaimScript,
};
