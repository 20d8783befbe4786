use event_worker::broker::RedisBrokerAdapter;
use event_worker::config::Config;
use event_worker::dispatcher::Dispatcher;
use event_worker::enricher::NoopEnrichment;
use event_worker::error::FatalError;
use event_worker::store::PostgresStoreAdapter;
use event_worker::{metrics, store};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[tokio::main]
async fn main() -> io::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting event worker");

    let config = Config::from_env()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;

    let db_config = db_pool::DbConfig {
        database_url: config.store.url.clone(),
        max_connections: config.store.max_connections,
        min_connections: config.store.min_connections,
        connect_timeout_secs: 10,
        acquire_timeout_secs: 10,
        idle_timeout_secs: 300,
        max_lifetime_secs: 1800,
    };

    let pg_pool = db_pool::create_pool(&db_config)
        .await
        .map_err(|err| FatalError::StoreInit(err.into()))
        .map_err(fatal_to_io)?;

    db_pool::migrate(&pg_pool, &MIGRATOR)
        .await
        .map_err(|err| FatalError::StoreInit(err.into()))
        .map_err(fatal_to_io)?;

    let redis_pool = redis_utils::RedisPool::connect(&config.broker.url)
        .await
        .map_err(|err| FatalError::BrokerAttach(err))
        .map_err(fatal_to_io)?;

    let broker: Arc<dyn event_worker::broker::BrokerAdapter> = Arc::new(RedisBrokerAdapter::new(
        redis_pool.manager(),
        config.broker.stream_name.clone(),
        config.broker.consumer_group.clone(),
    ));

    broker
        .attach(&config.broker.consumer_group, &config.broker.stream_name)
        .await
        .map_err(|err| FatalError::BrokerAttach(err.into()))
        .map_err(fatal_to_io)?;

    let store_adapter: Arc<dyn store::StoreAdapter> = Arc::new(PostgresStoreAdapter::new(pg_pool));
    let enrichment: Arc<dyn event_worker::enricher::Enrichment> = Arc::new(NoopEnrichment);

    let shutdown = Arc::new(AtomicBool::new(false));
    let dispatcher = Arc::new(Dispatcher::new(
        broker,
        store_adapter,
        enrichment,
        config.worker.clone(),
        Duration::from_millis(config.broker.block_timeout_ms),
        shutdown.clone(),
    ));

    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(err) = metrics::serve(metrics_port).await {
            tracing::error!(error = %err, "metrics listener exited");
        }
    });

    install_signal_handlers(shutdown.clone())?;

    let run_handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run().await }
    });

    run_handle.await.map_err(|err| {
        io::Error::new(io::ErrorKind::Other, format!("dispatcher task panicked: {err}"))
    })?;

    tracing::info!("event worker stopped");
    Ok(())
}

fn fatal_to_io(err: FatalError) -> io::Error {
    tracing::error!(error = %err, "fatal startup error");
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn install_signal_handlers(shutdown: Arc<AtomicBool>) -> io::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|err| fatal_to_io(FatalError::SignalHandlers(err)))?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, draining");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, draining");
            }
        }
        shutdown.store(true, Ordering::SeqCst);
    });

    Ok(())
}
