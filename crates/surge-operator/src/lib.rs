//! surge operator
//!
//! Watches TestRun and PrivateLoadZone resources and drives distributed
//! k6 executions: an initializer job inspects the script, runner jobs
//! execute it paused, a starter job resumes them, and the controller
//! walks the run through its stage machine, talking to the cloud
//! backend for cloud-bound runs.

pub mod cli;
pub mod config;
pub mod controller;
pub mod jobs;
pub mod runner_api;

pub use config::OperatorConfig;
pub use controller::{error_policy, reconcile, Context};
