use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, TextEncoder};
use std::convert::Infallible;
use std::time::Duration;

static EVENTS_PROCESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_worker_events_processed_total",
            "Events successfully persisted to the processed-events table",
        ),
        &["event_type"],
    )
    .expect("failed to create event_worker_events_processed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_worker_events_processed_total");
    counter
});

static EVENTS_DUPLICATE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_worker_events_duplicate_total",
            "Events rejected by the idempotency gate as already processed",
        ),
        &["event_type"],
    )
    .expect("failed to create event_worker_events_duplicate_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_worker_events_duplicate_total");
    counter
});

static EVENTS_FAILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_worker_events_failed_total",
            "Events routed to the dead-letter store, by failure kind",
        ),
        &["error_kind"],
    )
    .expect("failed to create event_worker_events_failed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_worker_events_failed_total");
    counter
});

static EVENTS_TIMEOUT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_worker_events_timeout_total",
            "Per-event processing deadline exceeded; left un-acked for redelivery",
        ),
        &["event_type"],
    )
    .expect("failed to create event_worker_events_timeout_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_worker_events_timeout_total");
    counter
});

static EVENT_PROCESSING_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "event_worker_event_processing_duration_seconds",
            "End-to-end per-event processing latency",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["event_type"],
    )
    .expect("failed to create event_worker_event_processing_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register event_worker_event_processing_duration_seconds");
    histogram
});

static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "event_worker_queue_depth",
        "Stream length observed at the start of the most recent batch read",
    )
    .expect("failed to create event_worker_queue_depth");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register event_worker_queue_depth");
    gauge
});

static ACTIVE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "event_worker_active_workers",
        "1 while this process is in the Running state, 0 otherwise",
    )
    .expect("failed to create event_worker_active_workers");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register event_worker_active_workers");
    gauge
});

pub fn record_processed(event_type: &str) {
    EVENTS_PROCESSED_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn record_duplicate(event_type: &str) {
    EVENTS_DUPLICATE_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn record_failed(error_kind: &str) {
    EVENTS_FAILED_TOTAL.with_label_values(&[error_kind]).inc();
}

pub fn record_timeout(event_type: &str) {
    EVENTS_TIMEOUT_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn observe_duration(event_type: &str, elapsed: Duration) {
    EVENT_PROCESSING_DURATION_SECONDS
        .with_label_values(&[event_type])
        .observe(elapsed.as_secs_f64());
}

pub fn set_queue_depth(depth: i64) {
    QUEUE_DEPTH.set(depth);
}

pub fn set_active(active: bool) {
    ACTIVE_WORKERS.set(if active { 1 } else { 0 });
}

fn render() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("prometheus encoding should never fail for well-formed metrics");
    buffer
}

/// Minimal `/metrics` + `/health` listener, started once at worker startup
/// and left running for the lifetime of the process.
pub async fn serve(port: u16) -> std::io::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => Response::builder()
                    .header("content-type", "text/plain; version=0.0.4")
                    .body(Body::from(render()))
                    .unwrap(),
                "/health" => Response::new(Body::from("ok")),
                _ => Response::builder()
                    .status(404)
                    .body(Body::from("not found"))
                    .unwrap(),
            };
            Ok::<_, Infallible>(response)
        }))
    });

    let addr = ([0, 0, 0, 0], port).into();
    Server::bind(&addr).serve(make_svc).await.map_err(|err| {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    })
}
