//! Envelope types for the protomux wire protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecResult;
use crate::{BROWSER_CLOSE_MESSAGE_ID, PAGE_PROXY_MESSAGE_RECEIVED};

/// Identifier correlating a request with its response.
pub type MessageId = i64;

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Connection-unique request id.
    pub id: MessageId,
    /// Protocol method name, e.g. `Page.navigate`.
    pub method: String,
    /// Method parameters; omitted on the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestEnvelope {
    /// Creates a request envelope.
    pub fn new(id: MessageId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error payload of an error response.
///
/// Deserialization never fails: a non-string `message`, or an `error`
/// that is not an object at all, is kept in its compact JSON form so the
/// request it answers can still be rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct ResponseError {
    /// Remote error message.
    pub message: String,
    /// Extra detail attached by the remote side. `Some(Value::Null)` means
    /// the field was present and `null`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<Value> for ResponseError {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut fields) => {
                let message = match fields.remove("message") {
                    Some(Value::String(message)) => message,
                    None | Some(Value::Null) => String::new(),
                    Some(other) => other.to_string(),
                };
                Self {
                    message,
                    data: fields.remove("data"),
                }
            }
            Value::String(message) => Self::new(message),
            other => Self::new(other.to_string()),
        }
    }
}

impl ResponseError {
    /// Creates an error payload without data.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Builder: attach data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Renders the message followed by the data, if any.
    ///
    /// String data is appended as-is; any other JSON value, `null`
    /// included, is appended in its compact form.
    pub fn describe(&self) -> String {
        match &self.data {
            None => self.message.clone(),
            Some(Value::String(data)) => format!("{} {}", self.message, data),
            Some(data) => format!("{} {}", self.message, data),
        }
    }
}

/// A parsed inbound frame that is neither a close acknowledgement nor
/// proxy traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl InboundFrame {
    /// Creates a successful response frame.
    pub fn response(id: MessageId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Default::default()
        }
    }

    /// Creates an error response frame.
    pub fn error_response(id: MessageId, error: ResponseError) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Creates an event frame.
    pub fn event(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: Some(method.into()),
            params: Some(params),
            ..Default::default()
        }
    }

    /// Rebuilds a response from a frame with an integer `id` whose other
    /// fields do not parse, so the pending request is settled anyway.
    fn salvage_response(id: MessageId, value: &Value) -> Self {
        match value.get("error") {
            Some(error) if !error.is_null() => {
                Self::error_response(id, ResponseError::from(error.clone()))
            }
            _ => Self::response(id, value.get("result").cloned().unwrap_or(Value::Null)),
        }
    }

    /// Consumes the frame and returns its shape.
    pub fn into_kind(self) -> FrameKind {
        match (self.id, self.error, self.method) {
            (Some(id), Some(error), _) => FrameKind::ErrorResponse { id, error },
            (Some(id), None, _) => FrameKind::Response {
                id,
                result: self.result.unwrap_or(Value::Null),
            },
            (None, _, Some(method)) => FrameKind::Event {
                method,
                params: self.params.unwrap_or(Value::Null),
            },
            (None, _, None) => FrameKind::Malformed,
        }
    }
}

/// Shape of an [`InboundFrame`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// Successful response; `result` is `null` when the frame had none.
    Response { id: MessageId, result: Value },
    /// Response carrying an error payload.
    ErrorResponse { id: MessageId, error: ResponseError },
    /// Event notification.
    Event { method: String, params: Value },
    /// Neither an id nor a method.
    Malformed,
}

/// Parameters of the synthetic [`PAGE_PROXY_MESSAGE_RECEIVED`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProxyMessageReceivedPayload {
    /// Proxy the original frame was addressed to.
    #[serde(rename = "pageProxyId")]
    pub page_proxy_id: String,
    /// The original frame, verbatim.
    pub message: Value,
}

impl PageProxyMessageReceivedPayload {
    /// Wraps the payload in a synthetic event frame.
    pub fn into_event_frame(self) -> InboundFrame {
        let params = serde_json::json!({
            "pageProxyId": self.page_proxy_id,
            "message": self.message,
        });
        InboundFrame::event(PAGE_PROXY_MESSAGE_RECEIVED, params)
    }
}

/// Classification of a decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Acknowledgement of the server's own close command; to be dropped.
    CloseAck(MessageId),
    /// Frame addressed to a page proxy.
    PageProxy(PageProxyMessageReceivedPayload),
    /// Ordinary response or event.
    Frame(InboundFrame),
}

impl Inbound {
    /// Classifies a decoded frame.
    ///
    /// The close sentinel wins over everything else, then a non-empty,
    /// non-zero `pageProxyId`; anything else is parsed as an
    /// [`InboundFrame`]. A frame with an integer `id` that does not parse
    /// is still classified as a response to that id.
    pub fn classify(value: Value) -> CodecResult<Self> {
        let id = value.get("id").and_then(Value::as_i64);
        if id == Some(BROWSER_CLOSE_MESSAGE_ID) {
            return Ok(Self::CloseAck(BROWSER_CLOSE_MESSAGE_ID));
        }

        let page_proxy_id = match value.get("pageProxyId") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Number(id)) if id.as_f64() != Some(0.0) => Some(id.to_string()),
            _ => None,
        };
        if let Some(page_proxy_id) = page_proxy_id {
            return Ok(Self::PageProxy(PageProxyMessageReceivedPayload {
                page_proxy_id,
                message: value,
            }));
        }

        match InboundFrame::deserialize(&value) {
            Ok(frame) => Ok(Self::Frame(frame)),
            Err(error) => match id {
                Some(id) => Ok(Self::Frame(InboundFrame::salvage_response(id, &value))),
                None => Err(error.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn close_sentinel_wins() {
        let value = json!({"id": BROWSER_CLOSE_MESSAGE_ID, "pageProxyId": "p1", "result": {}});
        assert_eq!(
            Inbound::classify(value).unwrap(),
            Inbound::CloseAck(BROWSER_CLOSE_MESSAGE_ID)
        );
    }

    #[test]
    fn page_proxy_keeps_original_frame() {
        let original = json!({"pageProxyId": "42", "message": "{\"id\":1}"});
        match Inbound::classify(original.clone()).unwrap() {
            Inbound::PageProxy(payload) => {
                assert_eq!(payload.page_proxy_id, "42");
                assert_eq!(payload.message, original);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn empty_page_proxy_id_is_ignored() {
        let value = json!({"pageProxyId": "", "method": "Browser.pageProxyCreated", "params": {}});
        assert!(matches!(Inbound::classify(value).unwrap(), Inbound::Frame(_)));
    }

    #[test]
    fn page_proxy_event_frame() {
        let payload = PageProxyMessageReceivedPayload {
            page_proxy_id: "7".to_string(),
            message: json!({"pageProxyId": "7", "id": 3, "result": {}}),
        };
        let frame = payload.into_event_frame();
        assert_eq!(frame.method.as_deref(), Some(PAGE_PROXY_MESSAGE_RECEIVED));
        insta::assert_json_snapshot!(frame.params, @r#"
        {
          "message": {
            "id": 3,
            "pageProxyId": "7",
            "result": {}
          },
          "pageProxyId": "7"
        }
        "#);
    }

    #[test]
    fn frame_kinds() {
        let response: InboundFrame = serde_json::from_value(json!({"id": 1, "result": {"a": 1}})).unwrap();
        assert_eq!(
            response.into_kind(),
            FrameKind::Response { id: 1, result: json!({"a": 1}) }
        );

        let empty: InboundFrame = serde_json::from_value(json!({"id": 2})).unwrap();
        assert_eq!(empty.into_kind(), FrameKind::Response { id: 2, result: Value::Null });

        let failed: InboundFrame =
            serde_json::from_value(json!({"id": 3, "error": {"message": "boom"}})).unwrap();
        assert_eq!(
            failed.into_kind(),
            FrameKind::ErrorResponse { id: 3, error: ResponseError::new("boom") }
        );

        let event: InboundFrame =
            serde_json::from_value(json!({"method": "Foo.bar", "params": {"x": true}})).unwrap();
        assert_eq!(
            event.into_kind(),
            FrameKind::Event { method: "Foo.bar".to_string(), params: json!({"x": true}) }
        );

        assert_eq!(InboundFrame::default().into_kind(), FrameKind::Malformed);
    }

    #[test]
    fn describe_appends_data() {
        assert_eq!(ResponseError::new("boom").describe(), "boom");
        assert_eq!(
            ResponseError::new("boom").with_data(json!("details")).describe(),
            "boom details"
        );
        assert_eq!(
            ResponseError::new("boom").with_data(json!({"line": 3})).describe(),
            r#"boom {"line":3}"#
        );
    }

    #[test]
    fn describe_keeps_present_null_data() {
        let error: ResponseError =
            serde_json::from_value(json!({"message": "boom", "data": null})).unwrap();
        assert_eq!(error.data, Some(Value::Null));
        assert_eq!(error.describe(), "boom null");

        let error: ResponseError = serde_json::from_value(json!({"message": "boom"})).unwrap();
        assert_eq!(error.data, None);
        assert_eq!(error.describe(), "boom");
    }

    #[test]
    fn odd_error_payloads_still_parse() {
        let numeric: ResponseError = serde_json::from_value(json!({"message": 42})).unwrap();
        assert_eq!(numeric.describe(), "42");

        let bare: ResponseError = serde_json::from_value(json!("boom")).unwrap();
        assert_eq!(bare, ResponseError::new("boom"));

        let nested: ResponseError =
            serde_json::from_value(json!({"code": -32000, "message": {"text": "no"}})).unwrap();
        assert_eq!(nested.describe(), r#"{"text":"no"}"#);
    }

    #[test]
    fn null_error_is_a_success() {
        let frame: InboundFrame =
            serde_json::from_value(json!({"id": 4, "error": null, "result": 1})).unwrap();
        assert_eq!(frame.into_kind(), FrameKind::Response { id: 4, result: json!(1) });
    }

    #[test]
    fn unparseable_response_is_salvaged() {
        let value = json!({"id": 9, "method": 7, "error": {"message": "gone"}});
        let Inbound::Frame(frame) = Inbound::classify(value).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(
            frame.into_kind(),
            FrameKind::ErrorResponse { id: 9, error: ResponseError::new("gone") }
        );

        let value = json!({"id": 10, "method": false, "result": {"ok": true}});
        let Inbound::Frame(frame) = Inbound::classify(value).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(
            frame.into_kind(),
            FrameKind::Response { id: 10, result: json!({"ok": true}) }
        );
    }

    #[test]
    fn zero_page_proxy_id_is_ignored() {
        let value = json!({"pageProxyId": 0, "id": 5, "result": {}});
        assert!(matches!(Inbound::classify(value).unwrap(), Inbound::Frame(_)));

        let value = json!({"pageProxyId": 3, "method": "Page.loadEventFired"});
        assert!(matches!(Inbound::classify(value).unwrap(), Inbound::PageProxy(_)));
    }

    #[test]
    fn classify_rejects_wrong_id_type() {
        let value = json!({"id": "abc", "result": {}});
        assert!(Inbound::classify(value).is_err());
    }
}
