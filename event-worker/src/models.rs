use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Closed set of event kinds this worker understands. Adding a new kind
/// means adding a variant here plus its validation/enrichment branches --
/// there is no stringly-typed fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Purchase,
    UserSignup,
    PageView,
    Custom,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Purchase => "purchase",
            EventType::UserSignup => "user_signup",
            EventType::PageView => "page_view",
            EventType::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// An immutable business occurrence as decoded off the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventType,
    #[serde(default)]
    pub user_id: Option<String>,
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Received,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

/// Persisted once per unique `event_id`; the idempotency anchor.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub user_id: Option<String>,
    pub timestamp: NaiveDateTime,
    pub properties: Map<String, Value>,
    pub status: EventStatus,
    pub enriched_data: Map<String, Value>,
    pub retry_count: i32,
}

/// A processing attempt that never reached ProcessedEvent.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    pub event_id: Uuid,
    pub payload: Value,
    pub error_message: String,
    pub retry_count: i32,
}

/// A single message as read from the broker: an opaque id plus the raw
/// `data` field bytes, not yet decoded.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub message_id: String,
    pub payload: Vec<u8>,
}
