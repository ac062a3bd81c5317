//! Kubernetes resource builders for a TestRun
//!
//! One initializer job inspects the script, N runner jobs execute it
//! (each with its own Service exposing the runner API), and a starter
//! or stop job drives the runners over that API with curl.

mod initializer;
mod runner;
mod starter;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use surge_common::crd::{PodOptions, TestRun};
use surge_common::{Error, Result, APP_LABEL, CR_LABEL_KEY, RUNNER_LABEL};

pub use initializer::initializer_job;
pub use runner::{runner_job, runner_service};
pub use starter::{starter_job, stop_job};

/// Labels shared by every resource of a run
pub fn common_labels(test_run: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL.0.to_string(), APP_LABEL.1.to_string());
    labels.insert(CR_LABEL_KEY.to_string(), test_run.to_string());
    labels
}

/// Labels of runner jobs, pods and services
pub fn runner_labels(test_run: &str) -> BTreeMap<String, String> {
    let mut labels = common_labels(test_run);
    labels.insert(RUNNER_LABEL.0.to_string(), RUNNER_LABEL.1.to_string());
    labels
}

/// Label selector matching the runner resources of a run
pub fn runner_selector(test_run: &str) -> String {
    format!(
        "{}={},{CR_LABEL_KEY}={test_run},{}={}",
        APP_LABEL.0, APP_LABEL.1, RUNNER_LABEL.0, RUNNER_LABEL.1
    )
}

/// Label selector matching the initializer pod of a run
pub fn initializer_selector(test_run: &str) -> String {
    format!(
        "{}={},{CR_LABEL_KEY}={test_run},job-name={test_run}-initializer",
        APP_LABEL.0, APP_LABEL.1
    )
}

/// Metadata owned by the TestRun
fn owned_meta(tr: &TestRun, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: tr.namespace(),
        labels: Some(labels),
        owner_references: tr.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

fn pod_options(options: &Option<PodOptions>) -> PodOptions {
    options.clone().unwrap_or_default()
}

fn optional_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

/// Execution-segment flags splitting the load across runners
///
/// Runner `index` (1-based) of `total` gets the half-open segment
/// `(index-1)/total : index/total`, with the shared sequence listing
/// every boundary.
pub fn segment_args(index: i32, total: i32) -> Result<Vec<String>> {
    if index < 1 || index > total {
        return Err(Error::internal(format!(
            "runner index {index} is outside of parallelism {total}"
        )));
    }

    let part = |n: i32| -> String {
        if n == 0 {
            "0".to_string()
        } else if n == total {
            "1".to_string()
        } else {
            format!("{n}/{total}")
        }
    };

    let sequence: Vec<String> = (0..=total).map(part).collect();

    Ok(vec![
        format!("--execution-segment={}:{}", part(index - 1), part(index)),
        format!("--execution-segment-sequence={}", sequence.join(",")),
    ])
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_args_for_first_of_four() {
        assert_eq!(
            segment_args(1, 4).unwrap(),
            vec![
                "--execution-segment=0:1/4".to_string(),
                "--execution-segment-sequence=0,1/4,2/4,3/4,1".to_string(),
            ]
        );
    }

    #[test]
    fn segment_args_for_last_runner() {
        assert_eq!(
            segment_args(3, 3).unwrap()[0],
            "--execution-segment=2/3:1"
        );
    }

    #[test]
    fn segment_args_reject_bad_index() {
        assert!(segment_args(5, 4).is_err());
        assert!(segment_args(0, 4).is_err());
    }

    #[test]
    fn selectors_carry_all_labels() {
        assert_eq!(runner_selector("smoke"), "app=k6,k6_cr=smoke,runner=true");
        assert_eq!(
            initializer_selector("smoke"),
            "app=k6,k6_cr=smoke,job-name=smoke-initializer"
        );
    }
}
