use crate::error::ValidationError;
use crate::models::{Event, EventType};
use chrono::Utc;

/// Pure, I/O-free business rule check. Runs after decoding, before enrichment.
pub fn validate(event: &Event) -> Result<(), ValidationError> {
    if event.event_type == EventType::Purchase {
        match event.properties.get("amount") {
            None => {
                return Err(ValidationError(
                    "Purchase events must have an amount".to_string(),
                ))
            }
            Some(value) => {
                let amount = value.as_f64();
                if !matches!(amount, Some(a) if a > 0.0) {
                    return Err(ValidationError(
                        "Purchase amount must be positive".to_string(),
                    ));
                }
            }
        }
    }

    if event.event_type == EventType::UserSignup {
        let empty = event.user_id.as_deref().map(str::is_empty).unwrap_or(true);
        if empty {
            return Err(ValidationError(
                "User signup events must have a user_id".to_string(),
            ));
        }
    }

    if event.timestamp > Utc::now().naive_utc() {
        return Err(ValidationError(
            "Event timestamp cannot be in the future".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn base_event(event_type: EventType) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type,
            user_id: Some("u1".to_string()),
            timestamp: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            properties: serde_json::Map::new(),
        }
    }

    #[test]
    fn purchase_requires_amount() {
        let event = base_event(EventType::Purchase);
        let err = validate(&event).unwrap_err();
        assert!(err.0.contains("amount"));
    }

    #[test]
    fn purchase_amount_must_be_positive() {
        let mut event = base_event(EventType::Purchase);
        event.properties.insert("amount".into(), json!(0));
        assert!(validate(&event).is_err());

        event.properties.insert("amount".into(), json!(-5));
        assert!(validate(&event).is_err());
    }

    #[test]
    fn purchase_with_positive_amount_is_valid() {
        let mut event = base_event(EventType::Purchase);
        event.properties.insert("amount".into(), json!(2500));
        assert!(validate(&event).is_ok());
    }

    #[test]
    fn user_signup_requires_nonempty_user_id() {
        let mut event = base_event(EventType::UserSignup);
        event.user_id = Some(String::new());
        let err = validate(&event).unwrap_err();
        assert!(err.0.contains("user_id"));

        event.user_id = None;
        assert!(validate(&event).is_err());
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let mut event = base_event(EventType::Custom);
        event.timestamp = Utc::now().naive_utc() + chrono::Duration::hours(1);
        let err = validate(&event).unwrap_err();
        assert!(err.0.contains("future"));
    }

    #[test]
    fn custom_events_have_no_extra_rules() {
        let event = base_event(EventType::Custom);
        assert!(validate(&event).is_ok());
    }
}
