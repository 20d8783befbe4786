use crate::error::EnrichError;
use crate::models::{Event, EventType};
use chrono::Utc;
use resilience::{with_retry, RetryConfig, RetryError};
use serde_json::{json, Map, Value};

/// External dependency this worker enriches events against. Swappable for
/// a fake in tests; the production implementation may call out to a
/// feature store, geo-IP lookup, or similar slow service.
#[async_trait::async_trait]
pub trait Enrichment: Send + Sync {
    async fn derive(&self, event: &Event) -> Result<Map<String, Value>, EnrichError>;
}

/// Always-succeeds enrichment used when no external dependency is
/// configured: still computes the type-specific derived fields.
pub struct NoopEnrichment;

#[async_trait::async_trait]
impl Enrichment for NoopEnrichment {
    async fn derive(&self, _event: &Event) -> Result<Map<String, Value>, EnrichError> {
        Ok(Map::new())
    }
}

/// Attach derived fields to an event, retrying the external dependency
/// call under the configured backoff policy. Always adds `processed_by`
/// and `processing_timestamp`, then layers on type-specific fields.
pub async fn enrich(
    event: &Event,
    worker_id: &str,
    dependency: &dyn Enrichment,
    retry_config: &RetryConfig,
) -> Result<Map<String, Value>, RetryError<EnrichError>> {
    let mut fields = with_retry(retry_config, || dependency.derive(event)).await?;

    fields.insert("processed_by".to_string(), json!(worker_id));
    fields.insert(
        "processing_timestamp".to_string(),
        json!(Utc::now().naive_utc().to_string()),
    );

    match event.event_type {
        EventType::Purchase => {
            let amount = event
                .properties
                .get("amount")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let category = if amount > 1000.0 { "high_value" } else { "standard" };
            fields.insert("category".to_string(), json!(category));
        }
        EventType::PageView => {
            fields.insert(
                "session_start".to_string(),
                json!(event.timestamp.to_string()),
            );
        }
        _ => {}
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    fn purchase_event(amount: f64) -> Event {
        let mut properties = Map::new();
        properties.insert("amount".to_string(), json!(amount));
        Event {
            event_id: Uuid::new_v4(),
            event_type: EventType::Purchase,
            user_id: Some("u1".to_string()),
            timestamp: Utc::now().naive_utc(),
            properties,
        }
    }

    #[tokio::test]
    async fn purchase_above_threshold_is_high_value() {
        let event = purchase_event(1000.01);
        let retry = RetryConfig {
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            jitter: false,
        };
        let fields = enrich(&event, "worker-1", &NoopEnrichment, &retry).await.unwrap();
        assert_eq!(fields.get("category").unwrap(), "high_value");
    }

    #[tokio::test]
    async fn purchase_at_exactly_threshold_is_standard() {
        let event = purchase_event(1000.0);
        let retry = RetryConfig {
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            jitter: false,
        };
        let fields = enrich(&event, "worker-1", &NoopEnrichment, &retry).await.unwrap();
        assert_eq!(fields.get("category").unwrap(), "standard");
    }

    struct FlakyTwiceThenSucceeds {
        attempts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Enrichment for FlakyTwiceThenSucceeds {
        async fn derive(&self, _event: &Event) -> Result<Map<String, Value>, EnrichError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                Err(EnrichError::Transient("dependency unavailable".into()))
            } else {
                Ok(Map::new())
            }
        }
    }

    #[tokio::test]
    async fn succeeds_after_two_transient_failures() {
        let event = purchase_event(10.0);
        let dependency = Arc::new(FlakyTwiceThenSucceeds {
            attempts: AtomicU32::new(0),
        });
        let retry = RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let result = enrich(&event, "worker-1", dependency.as_ref(), &retry).await;
        assert!(result.is_ok());
        assert_eq!(dependency.attempts.load(Ordering::SeqCst), 3);
    }
}
