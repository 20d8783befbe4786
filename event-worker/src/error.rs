use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing or unrecognized event_type")]
    UnknownEventType,
    #[error("properties must be a JSON object")]
    PropertiesNotAnObject,
    #[error("timestamp could not be parsed")]
    InvalidTimestamp,
    #[error("event_id could not be parsed as a UUID")]
    InvalidEventId,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("enrichment dependency unavailable: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a row for this event_id already exists")]
    DuplicateKey,
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("store error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Postgres unique_violation -- race between the dedupe check and a
    /// concurrent insert winning first.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("23505") {
                return StoreError::DuplicateKey;
            }
        }
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Other(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker command failed: {0}")]
    Command(#[from] redis::RedisError),
}

/// What a single pipeline run produced. Carries enough context for the
/// dispatcher to decide ack/no-ack and for the dead-letter step to have an
/// error string and payload even when decoding only partially succeeded.
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed { error: String, payload: serde_json::Value },
}

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("failed to initialize store: {0}")]
    StoreInit(#[source] anyhow::Error),
    #[error("failed to attach broker consumer group: {0}")]
    BrokerAttach(#[source] anyhow::Error),
    #[error("failed to install shutdown signal handlers: {0}")]
    SignalHandlers(#[source] std::io::Error),
}
