//! Error types for the push stream client.

use crate::types::EventKind;
use serde_json::Value;
use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by a failing listener.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid stream uri {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not connect to {uri}: {source}")]
    Network {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{}", http_message(.status, .description))]
    Http {
        status: u16,
        description: Option<String>,
        body: Value,
    },

    #[error("no data received for {after:?}")]
    IdleTimeout { after: Duration },

    #[error("session aborted")]
    Aborted,
}

fn http_message(status: &u16, description: &Option<String>) -> String {
    match description {
        Some(description) => format!("unexpected status {}: {}", status, description),
        None => format!("unexpected status {}", status),
    }
}

impl SessionError {
    /// Build an HTTP error from a non-200 status and its (possibly parsed) body.
    ///
    /// The description is taken from an `error_description` string field when
    /// the body is a JSON object carrying one.
    pub fn from_status(status: u16, body: Value) -> Self {
        let description = body
            .get("error_description")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        SessionError::Http {
            status,
            description,
            body,
        }
    }

    pub(crate) fn network(uri: &str, source: reqwest::Error) -> Self {
        SessionError::Network {
            uri: uri.to_string(),
            source,
        }
    }

    /// HTTP status code if applicable
    pub fn status_code(&self) -> Option<u16> {
        match self {
            SessionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body of an HTTP error
    pub fn body(&self) -> Option<&Value> {
        match self {
            SessionError::Http { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether the reconnect loop should keep trying after this error.
    ///
    /// Every transport and HTTP failure is retried; only an abort stops the loop.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Network { .. }
            | SessionError::Http { .. }
            | SessionError::IdleTimeout { .. } => true,
            SessionError::InvalidUri { .. } | SessionError::Config(_) | SessionError::Aborted => {
                false
            }
        }
    }
}

/// A listener failed while handling a notification.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener for `{event}` failed: {source}")]
    Failed {
        event: EventKind,
        #[source]
        source: BoxError,
    },

    #[error("listener for `{event}` panicked: {message}")]
    Panicked { event: EventKind, message: String },
}

impl ListenerError {
    pub(crate) fn panicked(event: EventKind, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        ListenerError::Panicked { event, message }
    }

    /// The notification kind the listener was handling when it failed.
    pub fn event(&self) -> EventKind {
        match self {
            ListenerError::Failed { event, .. } | ListenerError::Panicked { event, .. } => *event,
        }
    }
}
