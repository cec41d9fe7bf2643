//! Frame decoding.
//!
//! Turns one raw text frame into a [`ChangeEvent`]. Decoding is pure; a
//! failure carries the raw frame back so it can be published on the `error`
//! topic without interrupting the stream.

use crate::types::{ChangeEvent, DecodeFailure, ResourceState};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    name: String,
    #[serde(default)]
    resource_type: Option<String>,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    resource: Option<ResourceState>,
}

/// Decode one raw frame.
pub fn decode(frame: &str) -> Result<ChangeEvent, DecodeFailure> {
    let body: Value = serde_json::from_str(frame).map_err(|e| failure(frame, e))?;

    // Structs also deserialize from arrays; only objects are events.
    if !body.is_object() {
        return Err(failure(frame, "frame is not a JSON object"));
    }

    let envelope = Envelope::deserialize(&body).map_err(|e| failure(frame, e))?;
    if envelope.name.is_empty() {
        return Err(failure(frame, "event name is empty"));
    }

    Ok(ChangeEvent {
        name: envelope.name,
        resource_type: non_empty(envelope.resource_type),
        resource_id: non_empty(envelope.resource_id),
        resource: envelope.data.and_then(|d| d.resource),
        body,
    })
}

/// Decode a binary frame, accepting it only if it is UTF-8.
pub fn decode_bytes(frame: &[u8]) -> Result<ChangeEvent, DecodeFailure> {
    match std::str::from_utf8(frame) {
        Ok(text) => decode(text),
        Err(e) => Err(failure(&String::from_utf8_lossy(frame), e)),
    }
}

fn failure(frame: &str, error: impl ToString) -> DecodeFailure {
    DecodeFailure {
        error: error.to_string(),
        message: frame.to_string(),
    }
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_event() {
        let frame = r#"{"name":"resource.change","resourceType":"container","resourceId":"1i42",
            "data":{"resource":{"state":"running","transitioning":"no","imageUuid":"docker:nginx"}}}"#;
        let event = decode(frame).unwrap();

        assert_eq!(event.name, "resource.change");
        assert_eq!(event.resource_type.as_deref(), Some("container"));
        assert_eq!(event.resource_id.as_deref(), Some("1i42"));
        assert_eq!(event.state(), Some("running"));
        assert!(!event.is_transitioning());
        // Unknown fields survive in the body.
        assert_eq!(event.body["data"]["resource"]["imageUuid"], "docker:nginx");
    }

    #[test]
    fn test_decode_ping() {
        let event = decode(r#"{"name":"ping"}"#).unwrap();
        assert!(event.is_ping());
        assert!(event.resource.is_none());
    }

    #[test]
    fn test_missing_data_is_valid() {
        let event = decode(r#"{"name":"resource.change","resourceType":"host"}"#).unwrap();
        assert!(event.resource.is_none());

        let event = decode(r#"{"name":"resource.change","data":{}}"#).unwrap();
        assert!(event.resource.is_none());

        let event = decode(r#"{"name":"resource.change","data":{"resource":null}}"#).unwrap();
        assert!(event.resource.is_none());
    }

    #[test]
    fn test_empty_identifiers_are_absent() {
        let event = decode(r#"{"name":"resource.change","resourceType":"","resourceId":""}"#).unwrap();
        assert_eq!(event.resource_type, None);
        assert_eq!(event.resource_id, None);
    }

    #[test]
    fn test_truncated_json_fails_with_raw_frame() {
        let frame = r#"{"name":"resource.ch"#;
        let failure = decode(frame).unwrap_err();
        assert_eq!(failure.message, frame);
        assert!(!failure.error.is_empty());
    }

    #[test]
    fn test_shape_violations_fail() {
        assert!(decode(r#"{"resourceType":"container"}"#).is_err());
        assert!(decode(r#"{"name":42}"#).is_err());
        assert!(decode(r#"{"name":""}"#).is_err());
        assert!(decode(r#"["resource.change"]"#).is_err());
        assert!(decode(r#""ping""#).is_err());
        assert!(decode(r#"{"name":"resource.change","data":{"resource":{"state":7}}}"#).is_err());
    }

    #[test]
    fn test_decode_bytes_rejects_invalid_utf8() {
        assert!(decode_bytes(br#"{"name":"ping"}"#).is_ok());
        let failure = decode_bytes(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(failure.error.contains("utf-8"));
    }
}
