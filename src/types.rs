//! Core types for the event stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Event name the server uses for keepalives.
pub const PING_EVENT: &str = "ping";

/// Value of `data.resource.transitioning` marking a resource mid-transition.
pub const TRANSITIONING_YES: &str = "yes";

/// A decoded change notification.
///
/// The identifying fields are lifted out of the frame for topic derivation;
/// `body` keeps the complete JSON object so listeners see everything the
/// server sent.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    /// Event kind, e.g. `resource.change` or `ping`.
    pub name: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub resource: Option<ResourceState>,
    /// The full decoded frame.
    pub body: serde_json::Value,
}

impl ChangeEvent {
    /// True for the server keepalive, which bypasses topic derivation.
    pub fn is_ping(&self) -> bool {
        self.name == PING_EVENT
    }

    /// Resource state, if present and non-empty.
    pub fn state(&self) -> Option<&str> {
        self.resource
            .as_ref()
            .and_then(|r| r.state.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Whether the resource reports `transitioning == "yes"`.
    pub fn is_transitioning(&self) -> bool {
        self.resource
            .as_ref()
            .and_then(|r| r.transitioning.as_deref())
            .map(|t| t == TRANSITIONING_YES)
            .unwrap_or(false)
    }
}

/// The `data.resource` portion of a change event that drives filters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub transitioning: Option<String>,
}

/// A frame that could not be decoded.
///
/// Published on the `error` topic; `message` is the offending raw frame.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("failed to decode frame: {error}")]
pub struct DecodeFailure {
    /// The underlying parse error.
    pub error: String,
    /// The raw frame as received.
    pub message: String,
}

/// What a listener receives.
#[derive(Clone, Debug)]
pub enum Payload {
    /// A decoded event, shared across every topic it fans out to.
    Event(Arc<ChangeEvent>),
    /// A frame that failed to decode (only ever on the `error` topic).
    Error(Arc<DecodeFailure>),
}

impl Payload {
    /// The decoded event, unless this is a decode failure.
    pub fn as_event(&self) -> Option<&ChangeEvent> {
        match self {
            Payload::Event(event) => Some(event),
            Payload::Error(_) => None,
        }
    }

    /// The decode failure, if decoding failed.
    pub fn as_error(&self) -> Option<&DecodeFailure> {
        match self {
            Payload::Error(failure) => Some(failure),
            Payload::Event(_) => None,
        }
    }
}

/// One dispatch: a payload delivered under one topic name.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub topic: String,
    pub payload: Payload,
}

/// Observed state of a transport session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Open,
    Paused,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Paused => "paused",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Status passed to `stop`.
///
/// The default of 200 comes from the HTTP-flavoured API this client mirrors;
/// transports map it onto their own close vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloseStatus(pub u16);

impl Default for CloseStatus {
    fn default() -> Self {
        CloseStatus(200)
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(resource: Option<ResourceState>) -> ChangeEvent {
        ChangeEvent {
            name: "resource.change".to_string(),
            resource_type: None,
            resource_id: None,
            resource,
            body: json!({}),
        }
    }

    #[test]
    fn test_empty_state_is_absent() {
        let e = event(Some(ResourceState {
            state: Some(String::new()),
            transitioning: None,
        }));
        assert_eq!(e.state(), None);
        assert!(!e.is_transitioning());
    }

    #[test]
    fn test_transitioning_only_on_yes() {
        let e = event(Some(ResourceState {
            state: Some("running".to_string()),
            transitioning: Some("no".to_string()),
        }));
        assert!(!e.is_transitioning());
        assert_eq!(e.state(), Some("running"));

        let e = event(Some(ResourceState {
            state: None,
            transitioning: Some("yes".to_string()),
        }));
        assert!(e.is_transitioning());
    }

    #[test]
    fn test_decode_failure_serializes_error_and_message() {
        let failure = DecodeFailure {
            error: "EOF while parsing".to_string(),
            message: "{\"name\":".to_string(),
        };
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["error"], "EOF while parsing");
        assert_eq!(value["message"], "{\"name\":");
    }
}
