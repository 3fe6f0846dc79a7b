//! Control-server wire protocol.
//!
//! Every frame is a single JSON object discriminated by its `type` field.
//! Inbound frames are first read into a flat [`WireMessage`] and then
//! classified into the closed [`InboundMessage`] set, validating the fields
//! each variant needs. Outbound frames are serialized from
//! [`OutboundMessage`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Android key code for Enter, used when the IME enter action is unavailable.
pub const KEYCODE_ENTER: i32 = 66;

/// Default swipe duration when the server omits one.
pub const DEFAULT_SWIPE_DURATION_MS: u64 = 300;

/// Default wait duration when the server omits one.
pub const DEFAULT_WAIT_MS: u64 = 1000;

/// Opaque correlation token pairing a request with its response.
pub type RequestId = String;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Flat view of an inbound frame. Every variant's fields are optional here;
/// [`InboundMessage::decode`] decides which ones are required.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    request_id: Option<RequestId>,
    x: Option<i32>,
    y: Option<i32>,
    x1: Option<i32>,
    y1: Option<i32>,
    x2: Option<i32>,
    y2: Option<i32>,
    duration: Option<u64>,
    text: Option<String>,
    package_name: Option<String>,
    url: Option<String>,
    code: Option<i32>,
    intent_action: Option<String>,
    uri: Option<String>,
    extras: Option<BTreeMap<String, String>>,
    goal: Option<String>,
    session_id: Option<String>,
    step: Option<i64>,
    action: Option<Value>,
    reasoning: Option<String>,
    success: Option<bool>,
    steps_used: Option<u32>,
    message: Option<String>,
}

/// A single abstract device operation requested by the control server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Tap { x: i32, y: i32 },
    LongPress { x: i32, y: i32 },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u64,
    },
    Type { text: String },
    Clear,
    Enter,
    Paste,
    ClipboardSet { text: String },
    ClipboardGet,
    Back,
    Home,
    Notifications,
    Launch { package: String },
    SwitchApp { package: String },
    OpenUrl { url: String },
    OpenSettings,
    KeyEvent { code: i32 },
    Wait { duration_ms: u64 },
    Intent {
        action: Option<String>,
        uri: Option<String>,
        package: Option<String>,
        extras: BTreeMap<String, String>,
    },
}

impl DeviceAction {
    /// The wire `type` string for this action.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceAction::Tap { .. } => "tap",
            DeviceAction::LongPress { .. } => "longpress",
            DeviceAction::Swipe { .. } => "swipe",
            DeviceAction::Type { .. } => "type",
            DeviceAction::Clear => "clear",
            DeviceAction::Enter => "enter",
            DeviceAction::Paste => "paste",
            DeviceAction::ClipboardSet { .. } => "clipboard_set",
            DeviceAction::ClipboardGet => "clipboard_get",
            DeviceAction::Back => "back",
            DeviceAction::Home => "home",
            DeviceAction::Notifications => "notifications",
            DeviceAction::Launch { .. } => "launch",
            DeviceAction::SwitchApp { .. } => "switch_app",
            DeviceAction::OpenUrl { .. } => "open_url",
            DeviceAction::OpenSettings => "open_settings",
            DeviceAction::KeyEvent { .. } => "keyevent",
            DeviceAction::Wait { .. } => "wait",
            DeviceAction::Intent { .. } => "intent",
        }
    }

    /// Build the action named by `kind` from a wire frame, or `None` when
    /// `kind` is not an action.
    fn from_wire(kind: &str, wire: &mut WireMessage) -> Option<Self> {
        let x = wire.x.unwrap_or(0);
        let y = wire.y.unwrap_or(0);
        let action = match kind {
            "tap" => DeviceAction::Tap { x, y },
            "longpress" => DeviceAction::LongPress { x, y },
            "swipe" => DeviceAction::Swipe {
                x1: wire.x1.unwrap_or(0),
                y1: wire.y1.unwrap_or(0),
                x2: wire.x2.unwrap_or(0),
                y2: wire.y2.unwrap_or(0),
                duration_ms: wire.duration.unwrap_or(DEFAULT_SWIPE_DURATION_MS),
            },
            "type" => DeviceAction::Type {
                text: wire.text.take().unwrap_or_default(),
            },
            "clear" => DeviceAction::Clear,
            "enter" => DeviceAction::Enter,
            "paste" => DeviceAction::Paste,
            "clipboard_set" => DeviceAction::ClipboardSet {
                text: wire.text.take().unwrap_or_default(),
            },
            "clipboard_get" => DeviceAction::ClipboardGet,
            "back" => DeviceAction::Back,
            "home" => DeviceAction::Home,
            "notifications" => DeviceAction::Notifications,
            "launch" => DeviceAction::Launch {
                package: wire.package_name.take().unwrap_or_default(),
            },
            "switch_app" => DeviceAction::SwitchApp {
                package: wire.package_name.take().unwrap_or_default(),
            },
            "open_url" => DeviceAction::OpenUrl {
                url: wire.url.take().unwrap_or_default(),
            },
            "open_settings" => DeviceAction::OpenSettings,
            "keyevent" => DeviceAction::KeyEvent {
                code: wire.code.unwrap_or(0),
            },
            "wait" => DeviceAction::Wait {
                duration_ms: wire.duration.unwrap_or(DEFAULT_WAIT_MS),
            },
            "intent" => DeviceAction::Intent {
                action: wire.intent_action.take(),
                uri: wire.uri.take(),
                package: wire.package_name.take(),
                extras: wire.extras.take().unwrap_or_default(),
            },
            _ => return None,
        };
        Some(action)
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Request for the current screen state.
    GetScreen { request_id: RequestId },
    /// Liveness probe; answered with `pong`.
    Ping,
    /// Request to perform a device action.
    Action {
        request_id: RequestId,
        action: DeviceAction,
    },
    /// A new goal session began upstream.
    GoalStarted {
        session_id: Option<String>,
        goal: String,
    },
    /// One reasoning + action unit of the running goal.
    Step {
        index: i64,
        action: String,
        reasoning: String,
    },
    /// The goal finished; `success` decides the terminal status.
    GoalCompleted {
        success: bool,
        steps_used: Option<u32>,
    },
    /// The goal was aborted upstream.
    GoalFailed { message: Option<String> },
    /// A `type` this agent does not understand.
    Unknown { kind: String },
}

impl InboundMessage {
    /// Decode one JSON frame.
    ///
    /// Fails when the frame is not a JSON object with a string `type`, or when
    /// a request-style message lacks its `requestId`.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let wire: WireMessage = serde_json::from_str(text)?;
        Self::classify(wire)
    }

    fn classify(mut wire: WireMessage) -> Result<Self, ProtocolError> {
        let kind = std::mem::take(&mut wire.kind);
        let message = match kind.as_str() {
            "get_screen" => InboundMessage::GetScreen {
                request_id: require_request_id(&kind, &mut wire)?,
            },
            "ping" => InboundMessage::Ping,
            "goal_started" => InboundMessage::GoalStarted {
                session_id: wire.session_id.take(),
                goal: wire.goal.take().unwrap_or_default(),
            },
            "step" => InboundMessage::Step {
                index: wire.step.unwrap_or(0),
                action: match wire.action.take() {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
                reasoning: wire.reasoning.take().unwrap_or_default(),
            },
            "goal_completed" => InboundMessage::GoalCompleted {
                success: wire.success.unwrap_or(false),
                steps_used: wire.steps_used,
            },
            "goal_failed" => InboundMessage::GoalFailed {
                message: wire.message.take(),
            },
            _ => match DeviceAction::from_wire(&kind, &mut wire) {
                Some(action) => InboundMessage::Action {
                    request_id: require_request_id(&kind, &mut wire)?,
                    action,
                },
                None => InboundMessage::Unknown { kind: kind.clone() },
            },
        };
        Ok(message)
    }

    /// Whether this message must be answered with exactly one response.
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            InboundMessage::GetScreen { .. } | InboundMessage::Action { .. }
        )
    }

    /// The `type` string this message was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            InboundMessage::GetScreen { .. } => "get_screen",
            InboundMessage::Ping => "ping",
            InboundMessage::Action { action, .. } => action.kind(),
            InboundMessage::GoalStarted { .. } => "goal_started",
            InboundMessage::Step { .. } => "step",
            InboundMessage::GoalCompleted { .. } => "goal_completed",
            InboundMessage::GoalFailed { .. } => "goal_failed",
            InboundMessage::Unknown { kind } => kind,
        }
    }
}

fn require_request_id(kind: &str, wire: &mut WireMessage) -> Result<RequestId, ProtocolError> {
    wire.request_id
        .take()
        .ok_or_else(|| ProtocolError::MissingRequestId {
            kind: kind.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// One element of the on-screen tree. Opaque to the agent: it is only
/// serialized and fingerprinted, never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenElement(Value);

impl ScreenElement {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Answer to `get_screen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenResponse {
    pub request_id: RequestId,
    #[serde(default)]
    pub elements: Vec<ScreenElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_hash: Option<String>,
    /// Base64-encoded captured frame, only present when no element tree was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
}

/// Answer to an action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ResultResponse {
    /// Package an action outcome for `request_id`, passing its error text
    /// through unmodified.
    pub fn new(request_id: RequestId, result: ActionResult) -> Self {
        Self {
            request_id,
            success: result.success,
            error: result.error,
            data: result.data,
        }
    }
}

/// Frames the agent sends upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Pong,
    ScreenResponse(ScreenResponse),
    ResultResponse(ResultResponse),
}

impl OutboundMessage {
    /// The correlation id carried by this frame, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            OutboundMessage::Pong => None,
            OutboundMessage::ScreenResponse(r) => Some(&r.request_id),
            OutboundMessage::ResultResponse(r) => Some(&r.request_id),
        }
    }
}

/// Normalized outcome of any executed action, independent of which backend
/// path produced it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionResult {
    pub success: bool,
    pub error: Option<String>,
    pub data: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
        }
    }

    pub fn ok_with_data(data: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data.into()),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tap_with_coordinates() {
        let msg = InboundMessage::decode(r#"{"type":"tap","requestId":"r1","x":10,"y":20}"#)
            .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Action {
                request_id: "r1".into(),
                action: DeviceAction::Tap { x: 10, y: 20 },
            }
        );
        assert!(msg.expects_response());
    }

    #[test]
    fn swipe_and_wait_use_default_durations() {
        let swipe = InboundMessage::decode(
            r#"{"type":"swipe","requestId":"r","x1":1,"y1":2,"x2":3,"y2":4}"#,
        )
        .unwrap();
        match swipe {
            InboundMessage::Action {
                action: DeviceAction::Swipe { duration_ms, .. },
                ..
            } => assert_eq!(duration_ms, DEFAULT_SWIPE_DURATION_MS),
            other => panic!("unexpected message: {other:?}"),
        }

        let wait = InboundMessage::decode(r#"{"type":"wait","requestId":"r"}"#).unwrap();
        match wait {
            InboundMessage::Action {
                action: DeviceAction::Wait { duration_ms },
                ..
            } => assert_eq!(duration_ms, DEFAULT_WAIT_MS),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn missing_request_id_is_a_protocol_error() {
        let err = InboundMessage::decode(r#"{"type":"tap","x":1,"y":1}"#).unwrap_err();
        match err {
            ProtocolError::MissingRequestId { kind } => assert_eq!(kind, "tap"),
            other => panic!("expected MissingRequestId, got {other}"),
        }

        let err = InboundMessage::decode(r#"{"type":"get_screen"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingRequestId { .. }));
    }

    #[test]
    fn ping_needs_no_request_id() {
        let msg = InboundMessage::decode(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, InboundMessage::Ping);
        assert!(!msg.expects_response());
    }

    #[test]
    fn unknown_type_is_classified_not_rejected() {
        let msg = InboundMessage::decode(r#"{"type":"teleport","requestId":"r9"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Unknown {
                kind: "teleport".into()
            }
        );
        assert!(!msg.expects_response());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            InboundMessage::decode("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"requestId":"r"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn step_defaults_and_structured_action() {
        let msg = InboundMessage::decode(r#"{"type":"step"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Step {
                index: 0,
                action: String::new(),
                reasoning: String::new(),
            }
        );

        let msg = InboundMessage::decode(
            r#"{"type":"step","step":3,"action":{"action":"tap","x":1},"reasoning":"open menu"}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Step {
                index,
                action,
                reasoning,
            } => {
                assert_eq!(index, 3);
                assert!(action.contains("\"tap\""));
                assert_eq!(reasoning, "open menu");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn goal_notifications_decode() {
        let started = InboundMessage::decode(
            r#"{"type":"goal_started","sessionId":"s1","goal":"open settings"}"#,
        )
        .unwrap();
        assert_eq!(
            started,
            InboundMessage::GoalStarted {
                session_id: Some("s1".into()),
                goal: "open settings".into(),
            }
        );

        let completed =
            InboundMessage::decode(r#"{"type":"goal_completed","success":true,"stepsUsed":4}"#)
                .unwrap();
        assert_eq!(
            completed,
            InboundMessage::GoalCompleted {
                success: true,
                steps_used: Some(4),
            }
        );
    }

    #[test]
    fn intent_fields_decode() {
        let msg = InboundMessage::decode(
            r#"{"type":"intent","requestId":"r","intentAction":"android.intent.action.VIEW","uri":"geo:0,0","extras":{"k":"v"}}"#,
        )
        .unwrap();
        match msg {
            InboundMessage::Action {
                action:
                    DeviceAction::Intent {
                        action,
                        uri,
                        package,
                        extras,
                    },
                ..
            } => {
                assert_eq!(action.as_deref(), Some("android.intent.action.VIEW"));
                assert_eq!(uri.as_deref(), Some("geo:0,0"));
                assert!(package.is_none());
                assert_eq!(extras.get("k").map(String::as_str), Some("v"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn outbound_frames_use_camel_case_and_skip_absent_fields() {
        let pong = serde_json::to_value(OutboundMessage::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));

        let result = OutboundMessage::ResultResponse(ResultResponse::new(
            "r1".into(),
            ActionResult::failure("Gesture cancelled"),
        ));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "result_response",
                "requestId": "r1",
                "success": false,
                "error": "Gesture cancelled",
            })
        );

        let screen = OutboundMessage::ScreenResponse(ScreenResponse {
            request_id: "r2".into(),
            elements: vec![ScreenElement::new(serde_json::json!({"text": "OK"}))],
            screen_hash: Some("abc".into()),
            screenshot: None,
            package_name: Some("com.android.settings".into()),
        });
        let json = serde_json::to_value(&screen).unwrap();
        assert_eq!(json["type"], "screen_response");
        assert_eq!(json["screenHash"], "abc");
        assert_eq!(json["packageName"], "com.android.settings");
        assert_eq!(json["elements"][0]["text"], "OK");
        assert!(json.get("screenshot").is_none());
    }
}
