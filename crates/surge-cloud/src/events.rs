//! Cloud error events
//!
//! When the operator hits a problem the backend should surface to the
//! user (misconfiguration, runners failing to start), it posts an error
//! event, optionally paired with an abort request. Delivery is
//! best-effort: a lost event never blocks the reconcile loop.

use serde::Serialize;

/// Machine-readable error codes understood by the backend
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum ErrorCode {
    /// The operator could not start the runners
    K6OperatorStartError,
    /// The operator aborted the run
    K6OperatorAbortError,
    /// A runner failed mid-flight
    K6OperatorRunnerError,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EventKind {
    Error,
    Abort,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub(crate) struct EventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub(crate) struct Event {
    pub event_type: EventKind,
    pub event_payload: EventPayload,
}

/// A batch of events for one test run, built fluently:
///
/// ```ignore
/// Events::error(ErrorCode::K6OperatorStartError)
///     .with_detail("runner pods not ready")
///     .with_abort()
/// ```
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Events(pub(crate) Vec<Event>);

impl Events {
    /// Start a batch with a single error event
    pub fn error(code: ErrorCode) -> Self {
        Events(vec![Event {
            event_type: EventKind::Error,
            event_payload: EventPayload {
                error_code: Some(code),
                error_detail: None,
            },
        }])
    }

    /// Attach human-readable detail to the error event
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        if let Some(event) = self
            .0
            .iter_mut()
            .find(|e| e.event_type == EventKind::Error)
        {
            event.event_payload.error_detail = Some(detail.into());
        }
        self
    }

    /// Also ask the backend to abort the run
    pub fn with_abort(mut self) -> Self {
        self.0.push(Event {
            event_type: EventKind::Abort,
            event_payload: EventPayload::default(),
        });
        self
    }
}
