//! Cloud backend integration for surge
//!
//! HTTP client for the k6 cloud API, the interval/test-run pollers that
//! feed private load zones, the aggregation-config codec and error
//! event reporting.

pub mod aggregation;
pub mod client;
pub mod events;
pub mod poller;
pub mod testruns;
pub mod types;

pub use client::CloudClient;
pub use events::{ErrorCode, Events};
pub use poller::Poller;
pub use testruns::TestRunPoller;
pub use types::{
    AggregationConfig, CreateTestRunRequest, CreateTestRunResponse, InspectOutput,
    PlzRegistrationData, PlzResources, TestRunData, TestRunState,
};

/// Default cloud API endpoint
pub const DEFAULT_API_URL: &str = "https://api.k6.io";

/// Default metric ingest endpoint, handed to runner pods
pub const DEFAULT_INGEST_URL: &str = "https://ingest.k6.io";
