//! Private load zone support for surge
//!
//! A PrivateLoadZone resource registers the cluster as a load zone with
//! the cloud backend. For every live zone the operator keeps one
//! in-memory worker that polls for assigned runs and materializes them
//! as TestRun resources.

pub mod controller;
pub mod registry;
pub mod template;
pub mod worker;

pub use controller::PlzContext;
pub use registry::{Registry, WorkerRegistry};
pub use template::{plz_test_name, TestRunTemplate};
pub use worker::PlzWorker;
