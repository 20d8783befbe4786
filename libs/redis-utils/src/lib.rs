use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Keepalive configuration to prevent idle connection timeouts.
///
/// Load balancers in front of the broker often carry TCP idle timeouts
/// (typically 10-30 minutes); an idle connection left untouched that long
/// gets silently dropped. The keepalive sends periodic PING commands to
/// prevent that.
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// Interval between PING commands (default: 30 seconds)
    pub interval: Duration,
    pub enabled: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

impl KeepaliveConfig {
    /// - `REDIS_KEEPALIVE_ENABLED`: "true" or "false" (default: true)
    /// - `REDIS_KEEPALIVE_INTERVAL_SECS`: interval in seconds (default: 30)
    pub fn from_env() -> Self {
        let enabled = std::env::var("REDIS_KEEPALIVE_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(true);

        let interval_secs = std::env::var("REDIS_KEEPALIVE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30)
            .max(5);

        Self {
            interval: Duration::from_secs(interval_secs),
            enabled,
        }
    }
}

/// Redis connection pool with keepalive.
pub struct RedisPool {
    manager: SharedConnectionManager,
    _keepalive: Option<KeepaliveTask>,
}

impl RedisPool {
    /// Connect with default keepalive settings (enabled, 30s interval).
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::connect_with_keepalive(redis_url, KeepaliveConfig::from_env()).await
    }

    pub async fn connect_with_keepalive(redis_url: &str, keepalive: KeepaliveConfig) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to construct Redis client")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;
        let manager = Arc::new(Mutex::new(connection_manager));

        let keepalive_task = if keepalive.enabled {
            info!(
                interval_secs = keepalive.interval.as_secs(),
                "redis keepalive enabled"
            );
            Some(KeepaliveTask::spawn(manager.clone(), keepalive))
        } else {
            None
        };

        Ok(Self {
            manager,
            _keepalive: keepalive_task,
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

/// Background task that sends periodic PING commands to keep connections alive.
struct KeepaliveTask {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl KeepaliveTask {
    fn spawn(manager: SharedConnectionManager, config: KeepaliveConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = tokio::spawn(async move {
            keepalive_loop(manager, config.interval, shutdown_rx).await;
        });

        Self { shutdown_tx, handle }
    }
}

impl Drop for KeepaliveTask {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.handle.abort();
    }
}

async fn keepalive_loop(
    manager: SharedConnectionManager,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    let mut consecutive_failures = 0u32;
    const MAX_FAILURES_BEFORE_WARN: u32 = 3;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("redis keepalive task shutting down");
                break;
            }
            _ = sleep(interval) => {
                let result: Result<String, RedisError> = {
                    let mut conn = manager.lock().await;
                    redis::cmd("PING").query_async(&mut *conn).await
                };

                match result {
                    Ok(response) if response == "PONG" => {
                        debug!("redis keepalive PING successful");
                        consecutive_failures = 0;
                    }
                    Ok(response) => warn!("redis keepalive received unexpected response: {}", response),
                    Err(err) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= MAX_FAILURES_BEFORE_WARN {
                            warn!(
                                "redis keepalive PING failed ({} consecutive failures): {}",
                                consecutive_failures, err
                            );
                        } else {
                            debug!("redis keepalive PING failed (will retry): {}", err);
                        }
                    }
                }
            }
        }
    }
}

const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 3_000;
const MIN_REDIS_COMMAND_TIMEOUT_MS: u64 = 500;

fn redis_command_timeout() -> Duration {
    static TIMEOUT: OnceCell<Duration> = OnceCell::new();
    *TIMEOUT.get_or_init(|| {
        let ms = std::env::var("REDIS_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REDIS_COMMAND_TIMEOUT_MS)
            .max(MIN_REDIS_COMMAND_TIMEOUT_MS);

        info!("redis command timeout set to {}ms", ms);
        Duration::from_millis(ms)
    })
}

/// Wrap a Redis command future with the configured command timeout.
pub async fn with_timeout<F, T>(future: F) -> Result<T, RedisError>
where
    F: std::future::Future<Output = Result<T, RedisError>>,
{
    match timeout(redis_command_timeout(), future).await {
        Ok(res) => res,
        Err(_) => {
            error!("redis command timed out after {:?}", redis_command_timeout());
            Err(RedisError::from((
                redis::ErrorKind::IoError,
                "redis command timed out",
            )))
        }
    }
}
