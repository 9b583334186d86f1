use prometheus::{Encoder, TextEncoder, Registry, IntCounterVec, IntGauge, Histogram};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use tracing::warn;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_STREAMS: OnceLock<IntGauge> = OnceLock::new();
static PROVIDER_STREAM_SECONDS: OnceLock<Histogram> = OnceLock::new();

pub fn init_metrics() {
    if let Ok(counter) = IntCounterVec::new(
        prometheus::opts!("chat_requests_total", "Total chat API requests per route and status"),
        &["route", "status"],
    ) {
        if REQ_COUNTER.set(counter.clone()).is_ok() {
            REGISTRY.register(Box::new(counter)).ok();
        }
    }

    if let Ok(gauge) = IntGauge::new("active_streams", "Chat streams currently in flight") {
        if ACTIVE_STREAMS.set(gauge.clone()).is_ok() {
            REGISTRY.register(Box::new(gauge)).ok();
        }
    }

    if let Ok(histogram) = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "provider_stream_seconds",
            "Wall time of completion provider streams",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 120.0]),
    ) {
        if PROVIDER_STREAM_SECONDS.set(histogram.clone()).is_ok() {
            REGISTRY.register(Box::new(histogram)).ok();
        }
    }
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.inc();
    }
}

pub fn dec_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.dec();
    }
}

pub fn observe_provider_stream(duration: f64) {
    if let Some(histogram) = PROVIDER_STREAM_SECONDS.get() {
        histogram.observe(duration);
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
