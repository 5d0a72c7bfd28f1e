use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref INGEST_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "envmon_ingest_requests_total",
        "Total ingest requests received over HTTP"
    ))
    .unwrap();
    pub static ref READINGS_SAVED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "envmon_readings_saved_total",
        "Total sensor readings written to the store"
    ))
    .unwrap();
    pub static ref READINGS_FAILED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "envmon_readings_failed_total",
        "Total sensor entries dropped during per-entry conversion"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "envmon_db_failures_total",
        "Total database failures surfaced to clients"
    ))
    .unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "envmon_rate_limited_total",
        "Total requests rejected by the rate limiter"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "envmon_ingest_latency_seconds",
            "Time taken to validate and persist one ingest request"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(INGEST_REQUESTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(READINGS_SAVED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(READINGS_FAILED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DB_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RATE_LIMITED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
