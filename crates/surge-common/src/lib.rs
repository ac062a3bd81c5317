//! Common types for surge: CRDs, condition protocol, errors, and utilities

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace for surge system resources (operator, default token secret)
pub const SYSTEM_NAMESPACE: &str = "k6-operator-system";

/// Label carried by every resource the operator creates
pub const APP_LABEL: (&str, &str) = ("app", "k6");

/// Label key linking a subordinate resource back to its TestRun
pub const CR_LABEL_KEY: &str = "k6_cr";

/// Label pair marking runner jobs/pods/services
pub const RUNNER_LABEL: (&str, &str) = ("runner", "true");

/// Label pair on the secret holding the default cloud token
pub const TOKEN_LABEL: (&str, &str) = ("k6cloud", "token");

/// Key inside the token secret
pub const TOKEN_SECRET_KEY: &str = "token";

/// Port of the REST surface every runner pod exposes
pub const RUNNER_API_PORT: u16 = 6565;
