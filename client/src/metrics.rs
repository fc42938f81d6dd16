use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Once;
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref HTTP_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_http_requests_total",
        "Total API requests sent, including replays"
    ))
    .unwrap();
    pub static ref HTTP_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_http_failures_total",
        "Total API requests that ended in an error"
    ))
    .unwrap();
    pub static ref TOKEN_REFRESH_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_token_refresh_total",
        "Total access token refresh attempts"
    ))
    .unwrap();
    pub static ref TOKEN_REFRESH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_token_refresh_failures_total",
        "Total failed access token refresh attempts"
    ))
    .unwrap();
    pub static ref STREAM_EVENTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_stream_events_total",
        "Total events received on the realtime stream"
    ))
    .unwrap();
    pub static ref STREAM_EVENTS_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dashboard_stream_events_dropped_total",
        "Total stream events ignored because they did not match the selection"
    ))
    .unwrap();
    pub static ref STREAM_CONNECTED: Gauge = Gauge::with_opts(Opts::new(
        "dashboard_stream_connected",
        "1 while the realtime stream is connected"
    ))
    .unwrap();
    pub static ref TELEMETRY_SAMPLES: Gauge = Gauge::with_opts(Opts::new(
        "dashboard_telemetry_samples",
        "Samples currently held for the selected chart"
    ))
    .unwrap();
}

static INIT: Once = Once::new();

/// Registers every collector once; later calls are no-ops.
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(HTTP_REQUESTS_TOTAL.clone()),
            Box::new(HTTP_FAILURES_TOTAL.clone()),
            Box::new(TOKEN_REFRESH_TOTAL.clone()),
            Box::new(TOKEN_REFRESH_FAILURES_TOTAL.clone()),
            Box::new(STREAM_EVENTS_TOTAL.clone()),
            Box::new(STREAM_EVENTS_DROPPED_TOTAL.clone()),
            Box::new(STREAM_CONNECTED.clone()),
            Box::new(TELEMETRY_SAMPLES.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                warn!("Failed to register metric: {}", e);
            }
        }
    });
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
