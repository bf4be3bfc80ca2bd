//! Observability utilities: tracing setup and driver outcome counters

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| prometheus::register_int_counter_vec!("streamload_events_total", "Metric events published, by outcome", &["outcome"]).unwrap());
static CHUNKS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| prometheus::register_int_counter!("streamload_chunks_received_total", "Response body chunks recorded").unwrap());
static ACTIVE_DRIVERS: Lazy<IntGauge> = Lazy::new(|| prometheus::register_int_gauge!("streamload_active_drivers", "Drivers currently looping").unwrap());

pub fn init() {
    // Touch statics so the families show up in the first scrape.
    let _ = &*EVENTS_TOTAL;
    let _ = &*CHUNKS_RECEIVED;
    let _ = &*ACTIVE_DRIVERS;
}

pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub fn record_outcome(outcome: &str) {
    EVENTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_chunks(count: usize) {
    CHUNKS_RECEIVED.inc_by(count as u64);
}

pub fn outcome_count(outcome: &str) -> u64 {
    EVENTS_TOTAL.with_label_values(&[outcome]).get()
}

pub fn driver_started() {
    ACTIVE_DRIVERS.inc();
}

pub fn driver_stopped() {
    ACTIVE_DRIVERS.dec();
}

pub fn active_drivers() -> i64 {
    ACTIVE_DRIVERS.get()
}

/// Renders the default registry in the Prometheus text format.
pub fn gather_text() -> String {
    init();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(target: "obs", error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
