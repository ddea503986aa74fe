//! Inbound message classification.
//!
//! The worker emits loosely shaped envelopes: some wrap their payload under a
//! field (`{"type":"decision","decision":{...}}`), some send it bare. Both
//! shapes are tolerated here, once, and normalized into one
//! [`SessionEvent`] variant per event type so downstream consumers never
//! branch on shape.

use serde_json::Value;

use crate::types::{
    Decision, ExtractionUpdate, PageInfo, ProxyHealthSnapshot, ServerError, SessionEvent,
    StatusUpdate, StreamingInfo, TokenUsageUpdate,
};

/// Take the wrapped payload under `key` when present, otherwise treat the
/// whole envelope as the payload.
fn unwrap_payload(envelope: &Value, key: &str) -> Value {
    match envelope.get(key) {
        Some(inner) => inner.clone(),
        None => envelope.clone(),
    }
}

fn lenient<T: serde::de::DeserializeOwned + Default>(payload: Value) -> T {
    serde_json::from_value(payload).unwrap_or_default()
}

/// Classify a control-channel envelope by its `type` discriminator.
pub fn classify_control(envelope: Value) -> SessionEvent {
    let discriminator = envelope
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match discriminator.as_str() {
        "decision" => {
            let payload = unwrap_payload(&envelope, "decision");
            SessionEvent::Decision(lenient::<Decision>(payload))
        }
        "screenshot" => {
            // String-only validation happens in the aggregator; pass the raw
            // payload through.
            SessionEvent::Screenshot(unwrap_payload(&envelope, "screenshot"))
        }
        "token_usage" => {
            let payload = unwrap_payload(&envelope, "token_usage");
            SessionEvent::TokenUsage(lenient::<TokenUsageUpdate>(payload))
        }
        "proxy_stats" => {
            let payload = unwrap_payload(&envelope, "stats");
            SessionEvent::ProxyStats(lenient::<ProxyHealthSnapshot>(payload))
        }
        "page_info" => SessionEvent::PageInfo(lenient::<PageInfo>(envelope)),
        "extraction" => SessionEvent::Extraction(lenient::<ExtractionUpdate>(envelope)),
        "streaming_info" => SessionEvent::StreamingInfo(lenient::<StreamingInfo>(envelope)),
        "status" => SessionEvent::Status(lenient::<StatusUpdate>(envelope)),
        "error" => SessionEvent::ServerError(lenient::<ServerError>(envelope)),
        _ => {
            // Unrecognized discriminators carrying a generic status field are
            // still status updates; everything else republishes verbatim
            // under the literal discriminator.
            if envelope.get("status").is_some() {
                SessionEvent::Status(lenient::<StatusUpdate>(envelope))
            } else {
                let event = if discriminator.is_empty() {
                    "unknown".to_string()
                } else {
                    discriminator
                };
                SessionEvent::Other {
                    event,
                    payload: envelope,
                }
            }
        }
    }
}

/// Classify a stream-channel message. Every stream event lands under the
/// `stream_` prefix, a namespace disjoint from control-channel names.
pub fn classify_stream(envelope: Value) -> SessionEvent {
    let subtype = envelope
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    match subtype.as_str() {
        "frame" => match envelope.get("data").and_then(Value::as_str) {
            Some(data) => SessionEvent::StreamFrame(data.to_string()),
            None => SessionEvent::Stream {
                subtype,
                payload: envelope,
            },
        },
        "error" => {
            let text = envelope
                .get("error")
                .or_else(|| envelope.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Stream connection error")
                .to_string();
            SessionEvent::StreamError(text)
        }
        _ => SessionEvent::Stream {
            subtype,
            payload: envelope,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decision_unwraps_both_shapes() {
        let wrapped = classify_control(json!({
            "type": "decision",
            "decision": {"action": "click", "reason": "open link", "index": 3}
        }));
        let bare = classify_control(json!({
            "type": "decision",
            "action": "click",
            "reason": "open link",
            "index": 3
        }));

        for event in [wrapped, bare] {
            match event {
                SessionEvent::Decision(d) => {
                    assert_eq!(d.action.as_deref(), Some("click"));
                    assert_eq!(d.reason.as_deref(), Some("open link"));
                    assert_eq!(d.index, Some(3));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn decision_keeps_embedded_token_usage() {
        let event = classify_control(json!({
            "type": "decision",
            "decision": {
                "action": "type",
                "token_usage": {"prompt_tokens": 10, "response_tokens": 2, "total_tokens": 12}
            }
        }));
        match event {
            SessionEvent::Decision(d) => {
                let usage = d.token_usage.expect("embedded usage");
                assert_eq!(usage.total_tokens, 12);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn proxy_stats_unwraps_stats_field() {
        let event = classify_control(json!({
            "type": "proxy_stats",
            "stats": {"available": 4, "healthy": 3, "blocked": 1, "retry_count": 2}
        }));
        match event {
            SessionEvent::ProxyStats(s) => {
                assert_eq!(s.available, 4);
                assert_eq!(s.retry_count, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn proxy_stats_tolerates_bare_shape_with_missing_fields() {
        let event = classify_control(json!({"type": "proxy_stats", "healthy": 7}));
        match event {
            SessionEvent::ProxyStats(s) => {
                assert_eq!(s.healthy, 7);
                assert_eq!(s.available, 0);
                assert_eq!(s.blocked, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn screenshot_accepts_wrapped_and_bare_strings() {
        let wrapped = classify_control(json!({"type": "screenshot", "screenshot": "aGk="}));
        match wrapped {
            SessionEvent::Screenshot(v) => assert_eq!(v.as_str(), Some("aGk=")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_with_status_field_is_a_status_update() {
        let event = classify_control(json!({
            "type": "job_lifecycle",
            "status": "started",
            "detected_format": "json"
        }));
        match event {
            SessionEvent::Status(s) => {
                assert_eq!(s.status, "started");
                assert_eq!(s.detected_format.as_deref(), Some("json"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_republishes_under_literal_discriminator() {
        let event = classify_control(json!({"type": "telemetry", "cpu": 0.5}));
        match event {
            SessionEvent::Other { event, payload } => {
                assert_eq!(event, "telemetry");
                assert_eq!(payload["cpu"], 0.5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_envelope_prefers_message_then_error_field() {
        let with_message =
            classify_control(json!({"type": "error", "message": "proxy pool exhausted"}));
        match with_message {
            SessionEvent::ServerError(e) => assert_eq!(e.text(), "proxy pool exhausted"),
            other => panic!("unexpected event: {other:?}"),
        }

        let with_error = classify_control(json!({"type": "error", "error": "nav timeout"}));
        match with_error {
            SessionEvent::ServerError(e) => assert_eq!(e.text(), "nav timeout"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn stream_events_live_in_a_disjoint_namespace() {
        let frame = classify_stream(json!({"type": "frame", "data": "AAAA"}));
        assert_eq!(frame.name(), "stream_frame");

        let other = classify_stream(json!({"type": "quality", "value": 80}));
        assert_eq!(other.name(), "stream_quality");

        // A stream "error" can never collide with a control "error".
        let err = classify_stream(json!({"type": "error", "error": "no session"}));
        assert_eq!(err.name(), "stream_error");
    }
}
