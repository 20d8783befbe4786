use event_worker::broker::fake::InMemoryBroker;
use event_worker::broker::BrokerAdapter;
use event_worker::config::WorkerConfig;
use event_worker::dispatcher::Dispatcher;
use event_worker::enricher::{Enrichment, NoopEnrichment};
use event_worker::error::EnrichError;
use event_worker::models::{Event, StreamMessage};
use event_worker::store::fake::InMemoryStore;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config(retry_delay_secs: u64) -> WorkerConfig {
    WorkerConfig {
        worker_id: "worker-1".to_string(),
        batch_size: 5,
        processing_timeout_seconds: 5,
        max_retries: 3,
        retry_delay_seconds: retry_delay_secs,
    }
}

fn purchase_message(uuid_suffix: &str, amount: f64) -> StreamMessage {
    let payload = serde_json::to_vec(&json!({
        "event_id": format!("99999999-9999-9999-9999-99999999999{uuid_suffix}"),
        "event_type": "purchase",
        "user_id": "u1",
        "timestamp": "2024-01-01T00:00:00",
        "properties": {"amount": amount}
    }))
    .unwrap();

    StreamMessage {
        message_id: format!("{uuid_suffix}-0"),
        payload,
    }
}

#[tokio::test]
async fn batch_of_duplicates_and_fresh_events_acks_all_and_persists_once_each() {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryStore::new());

    broker.push(purchase_message("1", 50.0));
    broker.push(purchase_message("1", 50.0)); // redelivery of the same event_id
    broker.push(purchase_message("2", 75.0));

    let shutdown = Arc::new(AtomicBool::new(false));
    let dispatcher = Arc::new(Dispatcher::new(
        broker.clone(),
        store.clone(),
        Arc::new(NoopEnrichment),
        config(0),
        Duration::from_millis(10),
        shutdown.clone(),
    ));

    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run().await }
    });

    // The fake broker never blocks, so the messages pushed above drain on
    // the first couple of iterations; give the loop a moment then signal
    // shutdown and wait for it to observe the flag.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.store(true, Ordering::SeqCst);
    handle.await.unwrap();

    assert_eq!(broker.acked().len(), 3);
    assert_eq!(store.processed().len(), 2);
}

struct FlakyTwiceEnrichment {
    attempts: AtomicU32,
}

#[async_trait::async_trait]
impl Enrichment for FlakyTwiceEnrichment {
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
async fn enrichment_retries_until_success_with_no_dlq_row() {
    let store = InMemoryStore::new();
    let enrichment = FlakyTwiceEnrichment {
        attempts: AtomicU32::new(0),
    };
    let retry_config = config(0).retry_config();
    let processor = event_worker::processor::Processor {
        store: &store,
        enrichment: &enrichment,
        worker_id: "worker-1".to_string(),
        retry_config: resilience::RetryConfig {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(40),
            ..retry_config
        },
    };

    let payload = serde_json::to_vec(&json!({
        "event_id": "88888888-8888-8888-8888-888888888888",
        "event_type": "purchase",
        "user_id": "u1",
        "timestamp": "2024-01-01T00:00:00",
        "properties": {"amount": 10}
    }))
    .unwrap();

    let started = Instant::now();
    let outcome = processor.process(&payload, "1-0").await;
    let elapsed = started.elapsed();

    assert!(matches!(outcome, event_worker::error::Outcome::Succeeded));
    assert_eq!(store.processed().len(), 1);
    assert!(store.dlq().is_empty());
    assert!(elapsed >= Duration::from_millis(40));
}
