use crate::broker::BrokerAdapter;
use crate::codec;
use crate::enricher::{self, Enrichment};
use crate::error::{Outcome, StoreError};
use crate::metrics;
use crate::models::{EventStatus, FailedEvent, ProcessedEvent};
use crate::store::StoreAdapter;
use crate::validator;
use resilience::{with_retry, RetryConfig};
use std::time::Instant;
use tracing::{info_span, warn, Instrument};

/// Composes decode -> dedupe -> validate -> enrich -> persist for a single
/// message. Holds no session or broker handle beyond the call.
pub struct Processor<'a> {
    pub store: &'a dyn StoreAdapter,
    pub enrichment: &'a dyn Enrichment,
    pub worker_id: String,
    pub retry_config: RetryConfig,
}

impl<'a> Processor<'a> {
    pub async fn process(&self, payload: &[u8], message_id: &str) -> Outcome {
        let span = info_span!("process_event", message_id = %message_id);
        self.process_inner(payload).instrument(span).await
    }

    async fn process_inner(&self, payload: &[u8]) -> Outcome {
        let started_at = Instant::now();

        // 1. Decode.
        let event = match codec::decode(payload) {
            Ok(event) => event,
            Err(err) => {
                let raw = serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null);
                return self.dead_letter(None, raw, err.to_string(), "decode").await;
            }
        };

        let event_type_label = event.event_type.to_string();

        // 2. Dedupe -- the idempotency gate.
        match self.store.exists_processed(event.event_id).await {
            Ok(true) => {
                metrics::record_duplicate(&event_type_label);
                return Outcome::Succeeded;
            }
            Ok(false) => {}
            Err(err) => {
                return self
                    .dead_letter(
                        Some(event.event_id),
                        event_to_json(&event),
                        err.to_string(),
                        "store",
                    )
                    .await;
            }
        }

        // 3. Validate.
        if let Err(err) = validator::validate(&event) {
            return self
                .dead_letter(
                    Some(event.event_id),
                    event_to_json(&event),
                    err.0,
                    "validation",
                )
                .await;
        }

        // 4. Enrich, with retry.
        let enriched = match enricher::enrich(
            &event,
            &self.worker_id,
            self.enrichment,
            &self.retry_config,
        )
        .await
        {
            Ok(fields) => fields,
            Err(err) => {
                return self
                    .dead_letter(
                        Some(event.event_id),
                        event_to_json(&event),
                        err.to_string(),
                        "enrichment",
                    )
                    .await;
            }
        };

        // 5. Persist, with retry. DuplicateKey is a dedupe-race success.
        let processed = ProcessedEvent {
            event_id: event.event_id,
            event_type: event.event_type,
            user_id: event.user_id.clone(),
            timestamp: event.timestamp,
            properties: event.properties.clone(),
            status: EventStatus::Completed,
            enriched_data: enriched,
            retry_count: 0,
        };

        // DuplicateKey is a dedupe-race won by a concurrent insert, not a
        // failure -- it must resolve to Succeeded without ever entering the
        // retry loop. Only Transient is worth retrying; Other is a store
        // error the retry policy can't fix and goes straight to the DLQ.
        let first_attempt = self.store.insert_processed(clone_processed(&processed)).await;

        let persist_result = match first_attempt {
            Err(StoreError::Transient(_)) => {
                with_retry(&self.retry_config, || {
                    let candidate = clone_processed(&processed);
                    async move {
                        match self.store.insert_processed(candidate).await {
                            Err(StoreError::DuplicateKey) => Ok(()),
                            other => other,
                        }
                    }
                })
                .await
                .map_err(|retry_err| match retry_err {
                    resilience::RetryError::MaxRetriesExceeded(_, err) => err,
                })
            }
            other => other,
        };

        match persist_result {
            Ok(()) => {
                metrics::record_processed(&event_type_label);
                metrics::observe_duration(&event_type_label, started_at.elapsed());
                Outcome::Succeeded
            }
            Err(StoreError::DuplicateKey) => {
                metrics::record_duplicate(&event_type_label);
                Outcome::Succeeded
            }
            Err(err) => {
                self.dead_letter(
                    Some(event.event_id),
                    event_to_json(&event),
                    err.to_string(),
                    "store",
                )
                .await
            }
        }
    }

    async fn dead_letter(
        &self,
        event_id: Option<uuid::Uuid>,
        payload: serde_json::Value,
        error_message: String,
        error_kind: &str,
    ) -> Outcome {
        let event_id = event_id.unwrap_or_else(uuid::Uuid::new_v4);
        let failed = FailedEvent {
            event_id,
            payload: payload.clone(),
            error_message: error_message.clone(),
            retry_count: 0,
        };

        if let Err(dlq_err) = self.store.insert_dlq(failed).await {
            warn!(error = %dlq_err, "failed to write dead-letter record; message stays un-acked");
        }

        metrics::record_failed(error_kind);
        Outcome::Failed {
            error: error_message,
            payload,
        }
    }
}

/// Ack iff the outcome succeeded or reached the dead letter store. The
/// dispatcher, not the processor, owns the broker handle.
pub async fn ack_if_eligible(broker: &dyn BrokerAdapter, message_id: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Succeeded => {
            if let Err(err) = broker.ack(message_id).await {
                warn!(error = %err, "ack failed after successful processing");
            }
        }
        Outcome::Failed { .. } => {
            if let Err(err) = broker.ack(message_id).await {
                warn!(error = %err, "ack failed after dead-lettering");
            }
        }
    }
}

fn event_to_json(event: &crate::models::Event) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or(serde_json::Value::Null)
}

fn clone_processed(event: &ProcessedEvent) -> ProcessedEvent {
    ProcessedEvent {
        event_id: event.event_id,
        event_type: event.event_type,
        user_id: event.user_id.clone(),
        timestamp: event.timestamp,
        properties: event.properties.clone(),
        status: event.status,
        enriched_data: event.enriched_data.clone(),
        retry_count: event.retry_count,
    }
}
