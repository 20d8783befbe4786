use crate::error::StoreError;
use crate::models::{EventStatus, FailedEvent, ProcessedEvent};
use sqlx::PgPool;
use uuid::Uuid;

/// Persistence boundary: dedupe lookups, processed inserts, and
/// dead-letter inserts, each scoped to its own short transaction.
#[async_trait::async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn exists_processed(&self, event_id: Uuid) -> Result<bool, StoreError>;
    async fn insert_processed(&self, event: ProcessedEvent) -> Result<(), StoreError>;
    async fn insert_dlq(&self, event: FailedEvent) -> Result<(), StoreError>;
    async fn health(&self) -> bool;
}

pub struct PostgresStoreAdapter {
    pool: PgPool,
}

impl PostgresStoreAdapter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StoreAdapter for PostgresStoreAdapter {
    async fn exists_processed(&self, event_id: Uuid) -> Result<bool, StoreError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM processed_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;
        Ok(row.is_some())
    }

    async fn insert_processed(&self, event: ProcessedEvent) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_events
                (event_id, event_type, user_id, timestamp, properties, status, enriched_data, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.event_id)
        .bind(event.event_type.to_string())
        .bind(event.user_id)
        .bind(event.timestamp)
        .bind(serde_json::Value::Object(event.properties))
        .bind(status_label(event.status))
        .bind(serde_json::Value::Object(event.enriched_data))
        .bind(event.retry_count)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                tx.commit().await.map_err(StoreError::from_sqlx)?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(StoreError::from_sqlx(err))
            }
        }
    }

    async fn insert_dlq(&self, event: FailedEvent) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        let result = sqlx::query(
            r#"
            INSERT INTO failed_events (event_id, payload, error_message, retry_count)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.event_id)
        .bind(event.payload)
        .bind(event.error_message)
        .bind(event.retry_count)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                tx.commit().await.map_err(StoreError::from_sqlx)?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(StoreError::from_sqlx(err))
            }
        }
    }

    async fn health(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

fn status_label(status: EventStatus) -> &'static str {
    match status {
        EventStatus::Received => "received",
        EventStatus::Processing => "processing",
        EventStatus::Completed => "completed",
        EventStatus::Failed => "failed",
        EventStatus::DeadLetter => "dead_letter",
    }
}

/// In-memory fake used by processor/dispatcher tests. No network access
/// in this exercise, so this stands in for a real Postgres instance.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryStore {
        processed: Mutex<Vec<ProcessedEvent>>,
        dlq: Mutex<Vec<FailedEvent>>,
        reject_inserts: std::sync::atomic::AtomicBool,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reject_all_inserts(&self) {
            self.reject_inserts
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }

        pub fn processed(&self) -> Vec<ProcessedEvent> {
            self.processed.lock().unwrap().clone()
        }

        pub fn dlq(&self) -> Vec<FailedEvent> {
            self.dlq.lock().unwrap().clone()
        }
    }

    impl Clone for ProcessedEvent {
        fn clone(&self) -> Self {
            ProcessedEvent {
                event_id: self.event_id,
                event_type: self.event_type,
                user_id: self.user_id.clone(),
                timestamp: self.timestamp,
                properties: self.properties.clone(),
                status: self.status,
                enriched_data: self.enriched_data.clone(),
                retry_count: self.retry_count,
            }
        }
    }

    impl Clone for FailedEvent {
        fn clone(&self) -> Self {
            FailedEvent {
                event_id: self.event_id,
                payload: self.payload.clone(),
                error_message: self.error_message.clone(),
                retry_count: self.retry_count,
            }
        }
    }

    #[async_trait::async_trait]
    impl StoreAdapter for InMemoryStore {
        async fn exists_processed(&self, event_id: Uuid) -> Result<bool, StoreError> {
            Ok(self
                .processed
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.event_id == event_id))
        }

        async fn insert_processed(&self, event: ProcessedEvent) -> Result<(), StoreError> {
            if self.reject_inserts.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Transient("store rejecting inserts".into()));
            }
            let mut guard = self.processed.lock().unwrap();
            if guard.iter().any(|e| e.event_id == event.event_id) {
                return Err(StoreError::DuplicateKey);
            }
            guard.push(event);
            Ok(())
        }

        async fn insert_dlq(&self, event: FailedEvent) -> Result<(), StoreError> {
            self.dlq.lock().unwrap().push(event);
            Ok(())
        }

        async fn health(&self) -> bool {
            true
        }
    }
}
