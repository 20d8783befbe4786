use crate::broker::BrokerAdapter;
use crate::config::WorkerConfig;
use crate::enricher::Enrichment;
use crate::error::Outcome;
use crate::metrics;
use crate::processor::{ack_if_eligible, Processor};
use crate::store::StoreAdapter;
use resilience::{with_timeout, TimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Owns the broker/store handles and drives the Starting -> Running ->
/// Draining -> Stopped lifecycle. Injected at startup, never a global.
pub struct Dispatcher {
    broker: Arc<dyn BrokerAdapter>,
    store: Arc<dyn StoreAdapter>,
    enrichment: Arc<dyn Enrichment>,
    config: WorkerConfig,
    block_timeout: Duration,
    shutdown: Arc<AtomicBool>,
    state: Mutex<State>,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        store: Arc<dyn StoreAdapter>,
        enrichment: Arc<dyn Enrichment>,
        config: WorkerConfig,
        block_timeout: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            broker,
            store,
            enrichment,
            config,
            block_timeout,
            shutdown,
            state: Mutex::new(State::Starting),
        }
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    /// Run the Running-state loop until shutdown is signalled. Returns once
    /// the loop has drained its last in-flight batch.
    pub async fn run(&self) {
        *self.state.lock().unwrap() = State::Running;
        metrics::set_active(true);
        info!(worker_id = %self.config.worker_id, "dispatcher entering Running state");

        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.run_one_batch().await {
                error!(error = %err, "unhandled error on read path; backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }

        *self.state.lock().unwrap() = State::Draining;
        info!("dispatcher entering Draining state");
        metrics::set_active(false);

        *self.state.lock().unwrap() = State::Stopped;
    }

    async fn run_one_batch(&self) -> Result<(), anyhow::Error> {
        let messages = self
            .broker
            .read_batch(
                &self.config.worker_id,
                self.config.batch_size,
                self.block_timeout,
            )
            .await?;

        if let Ok(length) = self.broker.stream_length().await {
            metrics::set_queue_depth(length as i64);
        }

        if messages.is_empty() {
            return Ok(());
        }

        let deadline = self.config.processing_timeout();
        let retry_config = self.config.retry_config();
        let worker_id = self.config.worker_id.clone();

        let mut tasks = Vec::with_capacity(messages.len());
        for message in messages {
            let store = self.store.clone();
            let enrichment = self.enrichment.clone();
            let broker = self.broker.clone();
            let retry_config = retry_config.clone();
            let worker_id = worker_id.clone();

            tasks.push(tokio::spawn(async move {
                let processor = Processor {
                    store: store.as_ref(),
                    enrichment: enrichment.as_ref(),
                    worker_id,
                    retry_config,
                };

                let result: Result<Outcome, TimeoutError<std::convert::Infallible>> =
                    with_timeout(deadline, async {
                        Ok(processor.process(&message.payload, &message.message_id).await)
                    })
                    .await;

                match result {
                    Ok(outcome) => {
                        ack_if_eligible(broker.as_ref(), &message.message_id, &outcome).await;
                    }
                    Err(TimeoutError::Elapsed(_)) => {
                        warn!(
                            message_id = %message.message_id,
                            "event processing deadline exceeded; leaving un-acked for redelivery"
                        );
                        metrics::record_timeout("unknown");
                    }
                    Err(TimeoutError::OperationFailed(infallible)) => match infallible {},
                }
            }));
        }

        // Wait for every task of this batch before reading the next one.
        // Exceptions inside Processor are already handled there; a JoinError
        // here means the task itself panicked, which we log and move past.
        for result in futures::future::join_all(tasks).await {
            if let Err(join_err) = result {
                error!(error = %join_err, "processing task panicked");
            }
        }

        Ok(())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::fake::InMemoryBroker;
    use crate::enricher::NoopEnrichment;
    use crate::models::StreamMessage;
    use crate::store::fake::InMemoryStore;
    use serde_json::json;

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            worker_id: "worker-1".to_string(),
            batch_size: 10,
            processing_timeout_seconds: 1,
            max_retries: 1,
            retry_delay_seconds: 0,
        }
    }

    fn purchase_message(id: &str, amount: f64) -> StreamMessage {
        let payload = serde_json::to_vec(&json!({
            "event_id": format!("1111111{id}-1111-1111-1111-111111111111"),
            "event_type": "purchase",
            "user_id": "u1",
            "timestamp": "2024-01-01T00:00:00",
            "properties": {"amount": amount}
        }))
        .unwrap();

        StreamMessage {
            message_id: format!("{id}-0"),
            payload,
        }
    }

    #[tokio::test]
    async fn empty_batch_acks_nothing() {
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Dispatcher::new(
            broker.clone(),
            store,
            Arc::new(NoopEnrichment),
            test_config(),
            Duration::from_millis(10),
            Arc::new(AtomicBool::new(false)),
        );

        dispatcher.run_one_batch().await.unwrap();
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn successful_batch_acks_every_message() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.push(purchase_message("a", 100.0));
        broker.push(purchase_message("b", 2000.0));

        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Dispatcher::new(
            broker.clone(),
            store.clone(),
            Arc::new(NoopEnrichment),
            test_config(),
            Duration::from_millis(10),
            Arc::new(AtomicBool::new(false)),
        );

        dispatcher.run_one_batch().await.unwrap();

        assert_eq!(broker.acked().len(), 2);
        assert_eq!(store.processed().len(), 2);
    }
}
