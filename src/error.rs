//! Error taxonomy shared by the gateway, the export path and the workflow controller.
//!
//! Every failed call is classified exactly once, at the transport boundary, into a
//! [`RequestError`] with an [`ErrorKind`]. Nothing downstream inspects message text to
//! recover the kind.

use crate::model::Stage;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No response at all: refused, reset, DNS failure, TLS failure.
    NetworkUnreachable,
    /// The configured per-call timeout elapsed.
    Timeout,
    /// A response arrived with a 4xx/5xx status.
    ServerError,
    /// Rejected locally before any request was made.
    ClientInputInvalid,
    /// A response arrived but could not be decoded as expected.
    MalformedResponse,
    /// A downloaded artifact could not be written out.
    DeliveryFailed,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::NetworkUnreachable => "network unreachable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServerError => "server error",
            ErrorKind::ClientInputInvalid => "invalid input",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::DeliveryFailed => "delivery failed",
        }
    }
}

/// A classified failure of one gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct RequestError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, present only when a response was received.
    pub status: Option<u16>,
}

impl RequestError {
    pub fn network_unreachable(base_url: &str, detail: impl std::fmt::Display) -> Self {
        Self {
            kind: ErrorKind::NetworkUnreachable,
            message: format!(
                "Cannot connect to backend server at {base_url}. Please ensure the analysis server is running ({detail})."
            ),
            status: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: format!(
                "Request timed out after {}. The server is taking too long to respond; please try again.",
                humantime::format_duration(after)
            ),
            status: None,
        }
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ServerError,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ClientInputInvalid,
            message: message.into(),
            status: None,
        }
    }

    pub fn malformed(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::MalformedResponse,
            message: message.into(),
            status,
        }
    }

    pub fn delivery(target: &std::path::Path, err: &std::io::Error) -> Self {
        Self {
            kind: ErrorKind::DeliveryFailed,
            message: format!("Failed to save {}: {err}", target.display()),
            status: None,
        }
    }
}

/// Failure of a workflow action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("{stage} is not available yet: run {requires} first")]
    StageLocked { stage: Stage, requires: Stage },

    #[error("another action is still running")]
    Busy,
}

impl WorkflowError {
    /// The classified request failure, if this error carries one.
    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            WorkflowError::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure of the durable key-value store backing the session identity.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_stage_message_names_the_prerequisite() {
        let e = WorkflowError::StageLocked {
            stage: Stage::Clean,
            requires: Stage::Overview,
        };
        assert_eq!(
            e.to_string(),
            "clean is not available yet: run overview first"
        );
    }

    #[test]
    fn server_error_keeps_status_and_message() {
        let e = RequestError::server(500, "boom");
        assert_eq!(e.kind, ErrorKind::ServerError);
        assert_eq!(e.status, Some(500));
        assert_eq!(e.to_string(), "boom");
    }

    #[test]
    fn timeout_message_uses_human_duration() {
        let e = RequestError::timeout(Duration::from_secs(300));
        assert!(e.message.contains("5m"), "{}", e.message);
    }
}
