//! Error types for the surge operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries contextual information like the test run name
//! and the underlying cause, and maps onto a retry category: transient
//! errors are requeued, configuration errors fail the test run.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for surge operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Configuration error in a TestRun or PrivateLoadZone spec
    ///
    /// Not retryable: the user must fix the resource. Drives the test
    /// run into the terminal `error` stage.
    #[error("configuration error for {test_run}: {message}")]
    Configuration {
        /// Name of the resource with invalid configuration
        test_run: String,
        /// Description of what's invalid
        message: String,
    },

    /// Cloud backend error
    #[error("cloud error [{endpoint}]: {message}")]
    Cloud {
        /// Endpoint or operation that failed
        endpoint: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Token secret is misconfigured (missing entirely, or missing the token key)
    #[error("token error: {message}")]
    Token {
        /// Description of what's wrong with the token setup
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "worker")
        context: String,
    },
}

impl Error {
    /// Create a configuration error without resource context
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            test_run: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a configuration error with resource context
    pub fn configuration_for(test_run: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            test_run: test_run.into(),
            message: msg.into(),
        }
    }

    /// Create a retryable cloud error
    pub fn cloud(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            endpoint: endpoint.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable cloud error (e.g., rejected request)
    pub fn cloud_permanent(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            endpoint: endpoint.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a token error
    pub fn token(msg: impl Into<String>) -> Self {
        Self::Token {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error without specific context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration and serialization errors are not retryable (require
    /// a spec fix). Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout)
                // Don't retry on 4xx errors (validation, not found, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Configuration { .. } => false,
            Error::Cloud { retryable, .. } => *retryable,
            Error::Token { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: configuration mistakes fail the test run instead of retrying
    ///
    /// When parallelism exceeds the script's maximum VUs, or the script
    /// source is missing, requeueing will never help. These errors drive
    /// the run into the terminal error stage.
    #[test]
    fn story_configuration_errors_are_terminal() {
        let err = Error::configuration_for("load-test", "parallelism 10 exceeds maxVUs 5");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("load-test"));
        assert!(err.to_string().contains("maxVUs"));

        let err = Error::configuration("script source is missing");
        match &err {
            Error::Configuration { test_run, .. } => assert_eq!(test_run, UNKNOWN_CONTEXT),
            _ => panic!("Expected Configuration variant"),
        }
    }

    /// Story: cloud backend hiccups are retried, rejections are not
    #[test]
    fn story_cloud_error_retryability() {
        assert!(Error::cloud("/v1/tests", "connection reset").is_retryable());
        assert!(!Error::cloud_permanent("/v1/tests", "invalid project id").is_retryable());

        let err = Error::cloud("/get-tests", "timeout");
        assert!(err.to_string().contains("[/get-tests]"));
    }

    #[test]
    fn test_token_error_not_retryable() {
        // A missing token secret is a setup problem, not a transient one
        let err = Error::token("no secret carries the k6cloud=token label");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("token error"));
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("worker", "registry entry vanished");
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("worker"));
        assert!(err.to_string().contains("[worker]"));
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
    }

    #[test]
    fn test_serialization_error_not_retryable() {
        let err = Error::serialization("inspect output is not valid JSON");
        assert!(!err.is_retryable());
    }
}
