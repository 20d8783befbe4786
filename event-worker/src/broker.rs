use crate::error::BrokerError;
use crate::models::StreamMessage;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis_utils::{with_timeout, SharedConnectionManager};
use std::time::Duration;

/// Stream-broker boundary: attach a consumer group, read batches of new
/// messages, ack by id, and report depth/health for the observability loop.
#[async_trait::async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn attach(&self, group: &str, stream: &str) -> Result<(), BrokerError>;
    async fn read_batch(
        &self,
        consumer_name: &str,
        max_count: usize,
        block_timeout: Duration,
    ) -> Result<Vec<StreamMessage>, BrokerError>;
    async fn ack(&self, message_id: &str) -> Result<(), BrokerError>;
    async fn pending_count(&self) -> Result<u64, BrokerError>;
    async fn stream_length(&self) -> Result<u64, BrokerError>;
    async fn health(&self) -> bool;
}

pub struct RedisBrokerAdapter {
    manager: SharedConnectionManager,
    stream_name: String,
    consumer_group: String,
}

impl RedisBrokerAdapter {
    pub fn new(manager: SharedConnectionManager, stream_name: String, consumer_group: String) -> Self {
        Self {
            manager,
            stream_name,
            consumer_group,
        }
    }

    async fn conn(&self) -> tokio::sync::MutexGuard<'_, ConnectionManager> {
        self.manager.lock().await
    }
}

#[async_trait::async_trait]
impl BrokerAdapter for RedisBrokerAdapter {
    async fn attach(&self, group: &str, stream: &str) -> Result<(), BrokerError> {
        let mut conn = self.conn().await;
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(BrokerError::Command(err)),
        }
    }

    async fn read_batch(
        &self,
        consumer_name: &str,
        max_count: usize,
        block_timeout: Duration,
    ) -> Result<Vec<StreamMessage>, BrokerError> {
        use redis::streams::{StreamReadOptions, StreamReadReply};

        let opts = StreamReadOptions::default()
            .group(&self.consumer_group, consumer_name)
            .count(max_count)
            .block(block_timeout.as_millis() as usize);

        // XREADGROUP blocks server-side for up to `block_timeout` and then
        // returns an empty reply; it is not a "fast" command, so it must
        // not go through redis_utils::with_timeout's short command timeout.
        // The client-side deadline here is generous margin above the
        // server's own BLOCK deadline, guarding only against a connection
        // that never returns at all.
        let reply: StreamReadReply = tokio::time::timeout(block_timeout + Duration::from_secs(5), async {
            let mut conn = self.conn().await;
            conn.xread_options(&[&self.stream_name], &[">"], &opts)
                .await
        })
        .await
        .map_err(|_| BrokerError::Connection("blocking read exceeded its deadline".to_string()))?
        .map_err(BrokerError::Command)?;

        let mut messages = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(raw_value) = entry.map.get("data") {
                    if let Ok(data) = redis::from_redis_value::<String>(raw_value) {
                        messages.push(StreamMessage {
                            message_id: entry.id,
                            payload: serde_json::to_vec(&serde_json::json!({ "data": data }))
                                .unwrap_or_default(),
                        });
                    }
                }
            }
        }
        Ok(messages)
    }

    async fn ack(&self, message_id: &str) -> Result<(), BrokerError> {
        with_timeout(async {
            let mut conn = self.conn().await;
            conn.xack(&self.stream_name, &self.consumer_group, &[message_id])
                .await
        })
        .await
        .map_err(BrokerError::Command)
    }

    async fn pending_count(&self) -> Result<u64, BrokerError> {
        let mut conn = self.conn().await;
        let reply: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.stream_name)
            .arg(&self.consumer_group)
            .query_async(&mut *conn)
            .await
            .map_err(BrokerError::Command)?;

        Ok(match reply {
            redis::streams::StreamPendingReply::Empty => 0,
            redis::streams::StreamPendingReply::Data(data) => data.count as u64,
        })
    }

    async fn stream_length(&self) -> Result<u64, BrokerError> {
        let mut conn = self.conn().await;
        conn.xlen(&self.stream_name).await.map_err(BrokerError::Command)
    }

    async fn health(&self) -> bool {
        let mut conn = self.conn().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .is_ok()
    }
}

/// In-memory fake used by processor/dispatcher tests; models a single
/// stream with a FIFO of unacked messages.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryBroker {
        pending: Mutex<VecDeque<StreamMessage>>,
        acked: Mutex<Vec<String>>,
    }

    impl InMemoryBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, message: StreamMessage) {
            self.pending.lock().unwrap().push_back(message);
        }

        pub fn acked(&self) -> Vec<String> {
            self.acked.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl BrokerAdapter for InMemoryBroker {
        async fn attach(&self, _group: &str, _stream: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn read_batch(
            &self,
            _consumer_name: &str,
            max_count: usize,
            _block_timeout: Duration,
        ) -> Result<Vec<StreamMessage>, BrokerError> {
            let mut guard = self.pending.lock().unwrap();
            let mut batch = Vec::new();
            while batch.len() < max_count {
                match guard.pop_front() {
                    Some(message) => batch.push(message),
                    None => break,
                }
            }
            Ok(batch)
        }

        async fn ack(&self, message_id: &str) -> Result<(), BrokerError> {
            self.acked.lock().unwrap().push(message_id.to_string());
            Ok(())
        }

        async fn pending_count(&self) -> Result<u64, BrokerError> {
            Ok(self.pending.lock().unwrap().len() as u64)
        }

        async fn stream_length(&self) -> Result<u64, BrokerError> {
            Ok(self.pending.lock().unwrap().len() as u64)
        }

        async fn health(&self) -> bool {
            true
        }
    }
}
