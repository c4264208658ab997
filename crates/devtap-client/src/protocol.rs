//! Wire shapes of the DevTools protocol.
//!
//! Outgoing calls are `{"id", "method", "params"?}`. Inbound messages are
//! either responses (`{"id", "result"?}` / `{"id", "error"}`) or events
//! (`{"method", "params"}` without an id).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CdpError, RemoteError};
use crate::types::{Frame, RequestInfo, ResponseInfo};

// ---------------------------------------------------------------------------
// Outgoing
// ---------------------------------------------------------------------------

/// A call to send to the browser.
#[derive(Debug, Clone, Serialize)]
pub struct Command<'a> {
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl Command<'_> {
    pub fn to_json(&self) -> Result<String, CdpError> {
        serde_json::to_string(self).map_err(|e| CdpError::Decode {
            detail: format!("failed to serialize {}: {e}", self.method),
        })
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// An event received from the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    /// The event method name (e.g. "Page.loadEventFired").
    pub method: String,
    /// The event parameters; `Null` when the message carried none.
    pub params: Value,
}

impl CdpEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Decode the parameters into a caller-chosen shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CdpError> {
        decode_value(self.params.clone())
    }

    /// Classify this event into a known variant.
    pub fn kind(&self) -> DomainEvent {
        DomainEvent::from_event(self)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Reply to an outstanding call. A reply without `result` or `error`
    /// carries `Value::Null`.
    Response {
        id: u64,
        outcome: Result<Value, CdpError>,
    },
    Event(CdpEvent),
    /// A well-formed object that is neither a response nor an event.
    Unrecognized,
}

/// Parse one complete inbound message.
///
/// Fails only when the text is not a JSON object or its `id` is not an
/// integer; problems inside a response are reported through its outcome.
pub fn parse_inbound(text: &str) -> Result<Inbound, CdpError> {
    let json: Value = serde_json::from_str(text).map_err(CdpError::decode)?;
    let Value::Object(mut obj) = json else {
        return Err(CdpError::Decode {
            detail: "inbound message is not a JSON object".into(),
        });
    };

    if let Some(id) = obj.get("id") {
        let id = id.as_u64().ok_or_else(|| CdpError::Decode {
            detail: format!("response id {id} is not an unsigned integer"),
        })?;
        let outcome = if let Some(error) = obj.remove("error") {
            match serde_json::from_value::<RemoteError>(error) {
                Ok(err) => Err(CdpError::Remote(err)),
                Err(e) => Err(CdpError::Decode {
                    detail: format!("malformed error object: {e}"),
                }),
            }
        } else {
            Ok(obj.remove("result").unwrap_or(Value::Null))
        };
        return Ok(Inbound::Response { id, outcome });
    }

    match obj.remove("method") {
        Some(Value::String(method)) => {
            let params = obj.remove("params").unwrap_or(Value::Null);
            Ok(Inbound::Event(CdpEvent { method, params }))
        }
        _ => Ok(Inbound::Unrecognized),
    }
}

pub(crate) fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, CdpError> {
    serde_json::from_value(value).map_err(CdpError::decode)
}

// ---------------------------------------------------------------------------
// Typed events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameIdParams {
    frame_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigatedWithinDocumentParams {
    frame_id: String,
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct FrameNavigatedParams {
    frame: Frame,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseReceivedParams {
    request_id: String,
    response: ResponseInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestIdParams {
    request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadingFailedParams {
    request_id: String,
    #[serde(default)]
    error_text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TimestampParams {
    #[serde(default)]
    timestamp: Option<f64>,
}

/// Closed set of events the client understands, with a raw fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    LoadEventFired { timestamp: Option<f64> },
    DomContentEventFired { timestamp: Option<f64> },
    FrameNavigated(Frame),
    FrameStartedLoading { frame_id: String },
    FrameStoppedLoading { frame_id: String },
    NavigatedWithinDocument { frame_id: String, url: String },
    RequestWillBeSent(RequestInfo),
    ResponseReceived { request_id: String, response: ResponseInfo },
    LoadingFinished { request_id: String },
    LoadingFailed { request_id: String, error_text: String },
    /// Unknown method, or a known method whose params did not decode.
    Unknown { method: String, params: Value },
}

impl DomainEvent {
    pub fn from_event(event: &CdpEvent) -> Self {
        Self::try_from_event(event).unwrap_or_else(|| DomainEvent::Unknown {
            method: event.method.clone(),
            params: event.params.clone(),
        })
    }

    fn try_from_event(event: &CdpEvent) -> Option<Self> {
        fn params<T: DeserializeOwned>(event: &CdpEvent) -> Option<T> {
            serde_json::from_value(event.params.clone()).ok()
        }

        let decoded = match event.method.as_str() {
            "Page.loadEventFired" => DomainEvent::LoadEventFired {
                timestamp: params::<TimestampParams>(event).and_then(|p| p.timestamp),
            },
            "Page.domContentEventFired" => DomainEvent::DomContentEventFired {
                timestamp: params::<TimestampParams>(event).and_then(|p| p.timestamp),
            },
            "Page.frameNavigated" => {
                DomainEvent::FrameNavigated(params::<FrameNavigatedParams>(event)?.frame)
            }
            "Page.frameStartedLoading" => DomainEvent::FrameStartedLoading {
                frame_id: params::<FrameIdParams>(event)?.frame_id,
            },
            "Page.frameStoppedLoading" => DomainEvent::FrameStoppedLoading {
                frame_id: params::<FrameIdParams>(event)?.frame_id,
            },
            "Page.navigatedWithinDocument" => {
                let p = params::<NavigatedWithinDocumentParams>(event)?;
                DomainEvent::NavigatedWithinDocument {
                    frame_id: p.frame_id,
                    url: p.url,
                }
            }
            "Network.requestWillBeSent" => {
                DomainEvent::RequestWillBeSent(params::<RequestInfo>(event)?)
            }
            "Network.responseReceived" => {
                let p = params::<ResponseReceivedParams>(event)?;
                DomainEvent::ResponseReceived {
                    request_id: p.request_id,
                    response: p.response,
                }
            }
            "Network.loadingFinished" => DomainEvent::LoadingFinished {
                request_id: params::<RequestIdParams>(event)?.request_id,
            },
            "Network.loadingFailed" => {
                let p = params::<LoadingFailedParams>(event)?;
                DomainEvent::LoadingFailed {
                    request_id: p.request_id,
                    error_text: p.error_text,
                }
            }
            _ => return None,
        };
        Some(decoded)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_omits_absent_params() {
        let cmd = Command {
            id: 1,
            method: "Foo.bar",
            params: None,
        };
        assert_eq!(cmd.to_json().unwrap(), r#"{"id":1,"method":"Foo.bar"}"#);
    }

    #[test]
    fn command_serializes_params() {
        let params = json!({"expression": "1 + 1", "returnByValue": true});
        let cmd = Command {
            id: 7,
            method: "Runtime.evaluate",
            params: Some(&params),
        };
        let value: Value = serde_json::from_str(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "Runtime.evaluate");
        assert_eq!(value["params"]["expression"], "1 + 1");
    }

    #[test]
    fn parses_success_response() {
        let inbound = parse_inbound(r#"{"id":1,"result":{"x":5}}"#).unwrap();
        match inbound {
            Inbound::Response { id, outcome } => {
                assert_eq!(id, 1);
                assert_eq!(outcome.unwrap(), json!({"x": 5}));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parses_error_response() {
        let inbound =
            parse_inbound(r#"{"id":2,"error":{"code":-32000,"message":"nope"}}"#).unwrap();
        let Inbound::Response { id, outcome } = inbound else {
            panic!("expected response");
        };
        assert_eq!(id, 2);
        let err = outcome.unwrap_err();
        assert_eq!(err.remote_code(), Some(-32000));
    }

    #[test]
    fn response_without_result_is_null() {
        let Inbound::Response { outcome, .. } = parse_inbound(r#"{"id":3}"#).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(outcome.unwrap(), Value::Null);
    }

    #[test]
    fn malformed_error_object_is_a_decode_failure_for_that_call() {
        let Inbound::Response { id, outcome } =
            parse_inbound(r#"{"id":4,"error":"boom"}"#).unwrap()
        else {
            panic!("expected response");
        };
        assert_eq!(id, 4);
        assert!(matches!(outcome, Err(CdpError::Decode { .. })));
    }

    #[test]
    fn parses_event_with_and_without_params() {
        let Inbound::Event(event) =
            parse_inbound(r#"{"method":"Page.loadEventFired","params":{"t":1}}"#).unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(event.method, "Page.loadEventFired");
        assert_eq!(event.params, json!({"t": 1}));

        let Inbound::Event(bare) = parse_inbound(r#"{"method":"Page.domContentEventFired"}"#)
            .unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(bare.params, Value::Null);
    }

    #[test]
    fn rejects_non_objects_and_bad_ids() {
        assert!(parse_inbound("not json").is_err());
        assert!(parse_inbound("[1,2]").is_err());
        assert!(parse_inbound(r#"{"id":"seven"}"#).is_err());
        assert!(matches!(
            parse_inbound(r#"{"params":{}}"#).unwrap(),
            Inbound::Unrecognized
        ));
    }

    #[test]
    fn classifies_known_events() {
        let load = CdpEvent::new("Page.loadEventFired", json!({"timestamp": 12.5}));
        assert_eq!(
            load.kind(),
            DomainEvent::LoadEventFired {
                timestamp: Some(12.5)
            }
        );

        let moved = CdpEvent::new(
            "Page.navigatedWithinDocument",
            json!({"frameId": "F1", "url": "https://example.com/#a"}),
        );
        assert_eq!(
            moved.kind(),
            DomainEvent::NavigatedWithinDocument {
                frame_id: "F1".into(),
                url: "https://example.com/#a".into()
            }
        );

        let finished = CdpEvent::new("Network.loadingFinished", json!({"requestId": "R9"}));
        assert_eq!(
            finished.kind(),
            DomainEvent::LoadingFinished {
                request_id: "R9".into()
            }
        );

        let failed = CdpEvent::new(
            "Network.loadingFailed",
            json!({"requestId": "R10", "errorText": "net::ERR_ABORTED", "canceled": true}),
        );
        assert_eq!(
            failed.kind(),
            DomainEvent::LoadingFailed {
                request_id: "R10".into(),
                error_text: "net::ERR_ABORTED".into()
            }
        );
    }

    #[test]
    fn unknown_or_malformed_events_fall_back_to_raw() {
        let custom = CdpEvent::new("Custom.thing", json!({"a": 1}));
        assert_eq!(
            custom.kind(),
            DomainEvent::Unknown {
                method: "Custom.thing".into(),
                params: json!({"a": 1})
            }
        );

        let broken = CdpEvent::new("Page.frameStartedLoading", json!({}));
        assert!(matches!(broken.kind(), DomainEvent::Unknown { .. }));
    }
}
