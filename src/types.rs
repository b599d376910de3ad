//! Core types for the push stream client.

use crate::error::{ListenerError, SessionError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A decoded application event.
///
/// Produced from one record whose `data` lines parsed as JSON and which
/// carried an `event` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Value of the record's `event` field (may be empty).
    pub name: String,
    /// JSON parse of the record's newline-joined `data` lines.
    pub data: Value,
}

impl Event {
    /// The decoded payload with the event name injected as a `name` property.
    ///
    /// Payloads that are not JSON objects have nowhere to carry the name and
    /// are returned unchanged.
    pub fn to_json(&self) -> Value {
        let mut value = self.data.clone();
        if let Value::Object(map) = &mut value {
            map.insert("name".to_string(), Value::String(self.name.clone()));
        }
        value
    }
}

/// Names of the notifications a session publishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A decoded application event.
    Event,
    /// The server answered with a non-200 status.
    Response,
    /// The stream ended or failed after having connected.
    Disconnect,
    /// A reconnect attempt is about to start.
    Reconnect,
    /// A reconnect attempt failed.
    ReconnectError,
    /// A listener failed.
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Event,
        EventKind::Response,
        EventKind::Disconnect,
        EventKind::Reconnect,
        EventKind::ReconnectError,
        EventKind::Error,
    ];

    /// Wire name of this notification.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Event => "event",
            EventKind::Response => "response",
            EventKind::Disconnect => "disconnect",
            EventKind::Reconnect => "reconnect",
            EventKind::ReconnectError => "reconnect-error",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event kind: {}", s))
    }
}

/// Payload of a `response` notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    /// Parsed JSON body, or the raw body as a string when it is not JSON.
    pub body: Value,
}

/// Payload of a `reconnect-error` notification.
///
/// HTTP failures fill `status_code` and `body`; transport failures fill `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub error_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&SessionError> for ReconnectFailure {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Http { status, body, .. } => ReconnectFailure {
                status_code: Some(*status),
                error_description: err.to_string(),
                body: Some(body.clone()),
                error: None,
            },
            SessionError::Network { source, .. } => ReconnectFailure {
                status_code: None,
                error_description: err.to_string(),
                body: None,
                error: Some(source.to_string()),
            },
            other => ReconnectFailure {
                status_code: None,
                error_description: other.to_string(),
                body: None,
                error: Some(other.to_string()),
            },
        }
    }
}

/// A notification delivered to listeners.
#[derive(Debug)]
pub enum Notification {
    Event(Event),
    Response(HttpResponse),
    Disconnect,
    Reconnect,
    ReconnectError(ReconnectFailure),
    Error(ListenerError),
}

impl Notification {
    /// The kind listeners subscribe to for this notification.
    pub fn kind(&self) -> EventKind {
        match self {
            Notification::Event(_) => EventKind::Event,
            Notification::Response(_) => EventKind::Response,
            Notification::Disconnect => EventKind::Disconnect,
            Notification::Reconnect => EventKind::Reconnect,
            Notification::ReconnectError(_) => EventKind::ReconnectError,
            Notification::Error(_) => EventKind::Error,
        }
    }
}

/// Observable phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, never connected (or the last connect attempt failed).
    Idle,
    /// Waiting for response headers.
    Connecting,
    /// Receiving the response body.
    Streaming,
    /// The stream ended; a reconnect is scheduled.
    Disconnected,
    /// A reconnect attempt is in flight.
    Reconnecting,
    /// `abort()` was called.
    Aborted,
}

impl SessionState {
    /// Check if the session owns an open or opening request
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Aborted)
    }
}
