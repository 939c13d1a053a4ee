use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kind named by the `event:` line of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Token,
    ToolCallStarted,
    RunStarted,
    RunFinished,
    /// Frames without an `event:` line.
    Message,
    /// Anything else, carried through untouched (e.g. the diagnostic `event` kind).
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "token" => Self::Token,
            "tool_call_started" => Self::ToolCallStarted,
            "run_started" => Self::RunStarted,
            "run_finished" => Self::RunFinished,
            "" | "message" => Self::Message,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Token => "token",
            Self::ToolCallStarted => "tool_call_started",
            Self::RunStarted => "run_started",
            Self::RunFinished => "run_finished",
            Self::Message => "message",
            Self::Other(name) => name,
        }
    }
}

/// Decoded `data:` content. Structured when the joined data parses as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Raw(String),
}

impl Payload {
    pub fn decode(data: &str) -> Result<Self, (String, serde_json::Error)> {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => Ok(Self::Json(value)),
            Err(error) => Err((data.to_string(), error)),
        }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        match self {
            Self::Json(value) => value.get(key).and_then(Value::as_str),
            Self::Raw(_) => None,
        }
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        match self {
            Self::Json(value) => value.get(key).and_then(Value::as_f64),
            Self::Raw(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub id: Option<String>,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

impl StreamEvent {
    pub fn new(kind: EventKind, payload: Payload, received_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            id: None,
            payload,
            received_at,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// `delta` of a `token` event.
    pub fn delta(&self) -> Option<&str> {
        match self.kind {
            EventKind::Token => self.payload.str_field("delta"),
            _ => None,
        }
    }

    /// Raw tool identifier of a `tool_call_started` event.
    pub fn tool_name(&self) -> Option<&str> {
        match self.kind {
            EventKind::ToolCallStarted => self.payload.str_field("tool"),
            _ => None,
        }
    }

    /// Frame id, falling back to an `id` carried in the payload.
    pub fn effective_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.payload.str_field("id"))
            .filter(|id| !id.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_parse_known_and_passthrough() {
        assert_eq!(EventKind::parse("token"), EventKind::Token);
        assert_eq!(EventKind::parse("run_finished"), EventKind::RunFinished);
        assert_eq!(EventKind::parse(""), EventKind::Message);
        assert_eq!(
            EventKind::parse("event"),
            EventKind::Other("event".to_string())
        );
        assert_eq!(EventKind::parse("event").as_str(), "event");
    }

    #[test]
    fn test_effective_id_prefers_frame_id() {
        let event = StreamEvent::new(
            EventKind::ToolCallStarted,
            Payload::Json(json!({"tool": "exa_search", "id": "payload-id"})),
            Utc::now(),
        );
        assert_eq!(event.effective_id(), Some("payload-id"));
        assert_eq!(event.clone().with_id("frame-id").effective_id(), Some("frame-id"));
        assert_eq!(event.with_id("  ").effective_id(), Some("payload-id"));
    }

    #[test]
    fn test_delta_only_for_token_events() {
        let payload = Payload::Json(json!({"delta": "hi"}));
        let token = StreamEvent::new(EventKind::Token, payload.clone(), Utc::now());
        let message = StreamEvent::new(EventKind::Message, payload, Utc::now());
        assert_eq!(token.delta(), Some("hi"));
        assert_eq!(message.delta(), None);
        let raw = StreamEvent::new(EventKind::Token, Payload::Raw("hi".into()), Utc::now());
        assert_eq!(raw.delta(), None);
    }
}
