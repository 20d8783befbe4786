use crate::error::DecodeError;
use crate::models::{Event, EventType};
use serde_json::Value;
use uuid::Uuid;

/// Wire envelope on the stream: a single `data` field holding the
/// serialized event.
#[derive(serde::Deserialize)]
struct Envelope {
    data: String,
}

/// Decode the raw payload bytes read off the broker into a structured
/// Event, enforcing shape invariants. Unknown top-level fields on the
/// inner event object are ignored by serde's default struct deserialization.
pub fn decode(bytes: &[u8]) -> Result<Event, DecodeError> {
    let raw: Value = serde_json::from_slice(bytes)?;

    // Tolerate both the stream envelope (`{"data": "<json>"}`) and a bare
    // event object, so in-memory test fakes can hand over decoded JSON
    // directly without round-tripping through a string field.
    let event_value: Value = match raw {
        Value::Object(ref map) if map.contains_key("data") && map.len() == 1 => {
            let envelope: Envelope = serde_json::from_value(raw)?;
            serde_json::from_str(&envelope.data)?
        }
        other => other,
    };

    let obj = event_value
        .as_object()
        .ok_or(DecodeError::PropertiesNotAnObject)?;

    let event_type = obj
        .get("event_type")
        .and_then(Value::as_str)
        .and_then(parse_event_type)
        .ok_or(DecodeError::UnknownEventType)?;

    let event_id_raw = obj
        .get("event_id")
        .and_then(Value::as_str)
        .ok_or(DecodeError::InvalidEventId)?;
    let event_id = Uuid::parse_str(event_id_raw).map_err(|_| DecodeError::InvalidEventId)?;

    let properties = match obj.get("properties") {
        Some(Value::Object(map)) => map.clone(),
        None => serde_json::Map::new(),
        Some(_) => return Err(DecodeError::PropertiesNotAnObject),
    };

    let timestamp_raw = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or(DecodeError::InvalidTimestamp)?;
    let timestamp = parse_timestamp(timestamp_raw).ok_or(DecodeError::InvalidTimestamp)?;

    let user_id = obj
        .get("user_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Event {
        event_id,
        event_type,
        user_id,
        timestamp,
        properties,
    })
}

fn parse_event_type(raw: &str) -> Option<EventType> {
    match raw {
        "purchase" => Some(EventType::Purchase),
        "user_signup" => Some(EventType::UserSignup),
        "page_view" => Some(EventType::PageView),
        "custom" => Some(EventType::Custom),
        _ => None,
    }
}

/// Accept either an RFC3339 timestamp or a naive `YYYY-MM-DDTHH:MM:SS`
/// string, always normalizing to a timezone-naive UTC instant.
fn parse_timestamp(raw: &str) -> Option<chrono::NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&chrono::Utc).naive_utc());
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_bare_purchase_event() {
        let payload = br#"{
            "event_id": "11111111-1111-1111-1111-111111111111",
            "event_type": "purchase",
            "user_id": "u1",
            "timestamp": "2024-01-01T00:00:00",
            "properties": {"amount": 2500, "product_id": "p1"}
        }"#;

        let event = decode(payload).unwrap();
        assert_eq!(event.event_type, EventType::Purchase);
        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert_eq!(event.properties.get("amount").unwrap(), 2500);
    }

    #[test]
    fn decodes_the_envelope_wire_format() {
        let inner = r#"{"event_id":"22222222-2222-2222-2222-222222222222","event_type":"page_view","timestamp":"2024-01-01T00:00:00","properties":{}}"#;
        let envelope = serde_json::json!({ "data": inner });
        let bytes = serde_json::to_vec(&envelope).unwrap();

        let event = decode(&bytes).unwrap();
        assert_eq!(event.event_type, EventType::PageView);
    }

    #[test]
    fn rejects_unknown_event_type() {
        let payload = br#"{
            "event_id": "11111111-1111-1111-1111-111111111111",
            "event_type": "not_a_real_type",
            "timestamp": "2024-01-01T00:00:00",
            "properties": {}
        }"#;
        assert!(matches!(decode(payload), Err(DecodeError::UnknownEventType)));
    }

    #[test]
    fn rejects_non_object_properties() {
        let payload = br#"{
            "event_id": "11111111-1111-1111-1111-111111111111",
            "event_type": "custom",
            "timestamp": "2024-01-01T00:00:00",
            "properties": [1, 2, 3]
        }"#;
        assert!(matches!(
            decode(payload),
            Err(DecodeError::PropertiesNotAnObject)
        ));
    }

    #[test]
    fn ignores_unknown_extra_fields() {
        let payload = br#"{
            "event_id": "11111111-1111-1111-1111-111111111111",
            "event_type": "custom",
            "timestamp": "2024-01-01T00:00:00",
            "properties": {},
            "some_future_field": true
        }"#;
        assert!(decode(payload).is_ok());
    }
}
